use serde::{Deserialize, Serialize};

/// Serialized filesystem state handed to a stage at spawn time and merged
/// back when the stage ends. The layout belongs to the `Filesystem`
/// implementation; the engine only moves it around.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsSnapshot(serde_json::Value);

impl FsSnapshot {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut serde_json::Value {
        &mut self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// The authoritative filesystem a pipeline runs against.
///
/// `import_snapshot` replaces the current state wholesale; the orchestrator
/// only calls it from its control task, one stage at a time.
pub trait Filesystem: Send + Sync {
    fn export_snapshot(&self) -> FsSnapshot;
    fn import_snapshot(&self, snapshot: FsSnapshot) -> anyhow::Result<()>;
}
