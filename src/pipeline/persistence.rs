// loaded on startup and saved on quit so tweaks to the engine survive a restart
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::pipeline::project::EngineConfig;

pub const PROCSCORE_DIR: &str = ".procscore";
const CONFIG_FILE: &str = "config.json";

// <project_dir>/.procscore/config.json
fn config_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROCSCORE_DIR).join(CONFIG_FILE)
}

pub fn load_config(project_dir: &Path) -> Option<EngineConfig> {
    let path = config_file_path(project_dir);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable config: {e}");
            None
        }
    }
}

// Save the config to disk, making the directory if it doesn't exist already
pub fn save_config(project_dir: &Path, cfg: &EngineConfig) -> anyhow::Result<()> {
    let path = config_file_path(project_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
