use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use conduit_core::fs::{Filesystem, FsSnapshot};
use serde_json::{Map, Value};

/// Flat in-memory filesystem: path → UTF-8 content.
///
/// Snapshots are a JSON object `{ "<path>": "<content>", ... }`; stages edit
/// their copy with the helpers below.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            files: RwLock::new(
                files
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files.read().ok()?.get(path).cloned()
    }

    pub fn write(&self, path: &str, content: impl Into<String>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.to_string(), content.into());
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.files
            .read()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Filesystem for MemoryFs {
    fn export_snapshot(&self) -> FsSnapshot {
        let map: Map<String, Value> = self
            .files
            .read()
            .map(|files| {
                files
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        FsSnapshot::new(Value::Object(map))
    }

    fn import_snapshot(&self, snapshot: FsSnapshot) -> Result<()> {
        let files = match snapshot.into_value() {
            Value::Object(map) => map
                .into_iter()
                .map(|(path, content)| match content {
                    Value::String(s) => Ok((path, s)),
                    other => anyhow::bail!("{path}: expected string content, got {other}"),
                })
                .collect::<Result<BTreeMap<_, _>>>()?,
            Value::Null => BTreeMap::new(),
            other => anyhow::bail!("snapshot must be an object, got {other}"),
        };
        let mut guard = self
            .files
            .write()
            .map_err(|_| anyhow::anyhow!("filesystem lock poisoned"))?;
        *guard = files;
        Ok(())
    }
}

pub fn read_file(snapshot: &FsSnapshot, path: &str) -> Option<String> {
    snapshot
        .as_value()
        .get(path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn write_file(snapshot: &mut FsSnapshot, path: &str, content: impl Into<String>) -> Result<()> {
    let value = snapshot.as_value_mut();
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .context("snapshot is not a file map")?
        .insert(path.to_string(), Value::String(content.into()));
    Ok(())
}

pub fn remove_file(snapshot: &mut FsSnapshot, path: &str) -> Option<String> {
    match snapshot.as_value_mut().as_object_mut()?.remove(path)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}
