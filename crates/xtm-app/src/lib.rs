//! xtm-app - XCTest session orchestration
//!
//! Runs XCTest and XCUITest bundles on an attached iOS device by driving the
//! device's testmanagerd through one of three protocol generations, chosen
//! from the device's OS version. Results are collected through a
//! [`TestSink`](xtm_daemon::TestSink); [`TestListener`] is the provided one.
//!
//! Entry points:
//! - [`RunDriver`] - several targets in order, one combined error
//! - [`VersionDispatcher`] - a single target
//! - [`SessionOrchestrator`] - a single target on a known generation

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod listener;
pub mod registry;
pub mod session;
pub mod test_config;

// Re-export primary types
pub use config::{load_settings, load_test_configs, Settings, TargetConfig};
pub use dispatch::VersionDispatcher;
pub use driver::{RunDriver, RunResult};
pub use listener::TestListener;
pub use registry::{SessionGuard, SessionRegistry};
pub use session::termination::LOST_CONNECTION;
pub use session::{RunOutcome, Session, SessionContext, SessionOrchestrator, SessionState};
pub use test_config::TestConfigBuilder;

use xtm_core::Result;

/// Start file logging at the configured level; `XTM_LOG` still wins.
pub fn init_logging(settings: &Settings) -> Result<()> {
    xtm_core::logging::init(Some(&settings.log.level))
}
