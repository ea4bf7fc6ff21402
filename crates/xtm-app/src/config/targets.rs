//! Test target list from .xtm/targets.toml

use std::path::Path;

use xtm_core::prelude::*;
use xtm_core::TestConfig;

use super::settings::XTM_DIR;
use super::types::{Settings, TargetConfig, TargetsFile};

const TARGETS_FILENAME: &str = "targets.toml";

/// Load the `[[targets]]` entries, in file order.
pub fn load_targets(project_path: &Path) -> Result<Vec<TargetConfig>> {
    let path = project_path.join(XTM_DIR).join(TARGETS_FILENAME);
    if !path.exists() {
        return Err(Error::ConfigNotFound { path });
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::config(format!("Failed to read {:?}: {}", path, e)))?;
    let file: TargetsFile = toml::from_str(&content)
        .map_err(|e| Error::config_invalid(format!("{}: {}", path.display(), e)))?;

    debug!("Loaded {} test targets from {:?}", file.targets.len(), path);
    Ok(file.targets)
}

/// Load targets and resolve them against `settings`.
pub fn load_test_configs(project_path: &Path, settings: &Settings) -> Result<Vec<TestConfig>> {
    Ok(load_targets(project_path)?
        .into_iter()
        .map(|target| {
            debug!("Target '{}'", target.display_name());
            target.into_test_config(settings)
        })
        .collect())
}
