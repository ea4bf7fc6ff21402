//! Settings parser for .xtm/config.toml

use std::path::Path;

use xtm_core::prelude::*;

use super::types::Settings;

pub(super) const XTM_DIR: &str = ".xtm";
const CONFIG_FILENAME: &str = "config.toml";

/// Overrides `[run] timeout_secs` when set to an integer
pub const TIMEOUT_ENV: &str = "XTM_TIMEOUT_SECS";

/// Load settings from .xtm/config.toml
///
/// A missing or unreadable file yields defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(XTM_DIR).join(CONFIG_FILENAME);

    let mut settings = if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        Settings::default()
    } else {
        match std::fs::read_to_string(&config_path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    debug!("Loaded settings from {:?}", config_path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse {:?}: {}", config_path, e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {:?}: {}", config_path, e);
                Settings::default()
            }
        }
    };

    apply_env_overrides(&mut settings);
    settings
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(value) = std::env::var(TIMEOUT_ENV) {
        match value.trim().parse::<u64>() {
            Ok(secs) => settings.run.timeout_secs = Some(secs),
            Err(_) => warn!("Ignoring {}={:?}: not a number of seconds", TIMEOUT_ENV, value),
        }
    }
}

/// Create default config files in .xtm/ directory
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let xtm_dir = project_path.join(XTM_DIR);

    if !xtm_dir.exists() {
        std::fs::create_dir_all(&xtm_dir)
            .map_err(|e| Error::config(format!("Failed to create .xtm dir: {}", e)))?;
    }

    let config_path = xtm_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# XCTest session manager configuration

[run]
# timeout_secs = 600    # Cancel a test target after this long

[run.env]
# Passed to every test runner; a target's env overrides these

[log]
level = "info"          # Used when XTM_LOG is not set
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    }

    Ok(())
}
