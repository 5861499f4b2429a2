use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default conduit data directory: ~/.conduit
pub fn get_conduit_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".conduit"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    let mut cfg = toml::from_str::<AppConfig>(&s)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.conduit/config.toml (highest)
    let conduit_config = get_conduit_data_dir()?.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg: AppConfig = if conduit_config.exists() {
        let s = std::fs::read_to_string(&conduit_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else if local_config.exists() {
        let s = std::fs::read_to_string(local_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

// Environment variable overrides (Priority 0: highest)
fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("CONDUIT_STREAMING") {
        match v.trim() {
            "" => {}
            "0" | "false" | "off" => cfg.pipeline.streaming = false,
            _ => cfg.pipeline.streaming = true,
        }
    }
    if let Ok(v) = std::env::var("CONDUIT_MODULES_DIR") {
        if !v.trim().is_empty() {
            cfg.commands.modules_dir = Some(v);
        }
    }
}
