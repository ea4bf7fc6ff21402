//! Configuration file parsing
//!
//! Supports:
//! - `.xtm/config.toml` - Run defaults and log level
//! - `.xtm/targets.toml` - Test targets, run in file order

pub mod settings;
pub mod targets;
pub mod types;

pub use settings::{init_config_dir, load_settings, TIMEOUT_ENV};
pub use targets::{load_targets, load_test_configs};
pub use types::*;
