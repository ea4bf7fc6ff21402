//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Cannot connect to {service}: {message}")]
    Connection { service: String, message: String },

    #[error("Lost connection to testmanagerd: {message}")]
    ConnectionLost { message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("{selector} failed: {message}")]
    CallFailed { selector: String, message: String },

    #[error("{selector}: got wrong return value, expected {expected}: {payload}")]
    UnexpectedReply {
        selector: String,
        expected: &'static str,
        payload: String,
    },

    #[error("testmanagerd refused to authorize the test session for pid {pid}")]
    AuthorizationRefused { pid: u64 },

    // ─────────────────────────────────────────────────────────────
    // App Resolution Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Did not find app '{bundle_id}' on device. Is it installed?")]
    AppNotFound { bundle_id: String },

    #[error("App '{bundle_id}' does not declare a sandbox home directory")]
    NoHomeDirectory { bundle_id: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Delivery Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Failed to transfer '{path}' to the device: {message}")]
    FileTransfer { path: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Runner Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to launch test runner '{bundle_id}': {reason}")]
    Launch { bundle_id: String, reason: String },

    #[error("Failed to kill process {pid}: {reason}")]
    Kill { pid: u64, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Cannot determine iOS version: {message}")]
    VersionQuery { message: String },

    #[error("Invalid OS version: '{0}'")]
    InvalidVersion(String),

    #[error("Device {udid} already has an active test session")]
    DeviceBusy { udid: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Test Run Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Test run failed: {message}")]
    TestRun { message: String },

    #[error("test target {index}: {source}")]
    Target {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn connection(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn call_failed(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CallFailed {
            selector: selector.into(),
            message: message.into(),
        }
    }

    pub fn app_not_found(bundle_id: impl Into<String>) -> Self {
        Self::AppNotFound {
            bundle_id: bundle_id.into(),
        }
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    pub fn file_transfer(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileTransfer {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn launch(bundle_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Launch {
            bundle_id: bundle_id.into(),
            reason: reason.into(),
        }
    }

    pub fn kill(pid: u64, reason: impl Into<String>) -> Self {
        Self::Kill {
            pid,
            reason: reason.into(),
        }
    }

    pub fn version_query(message: impl Into<String>) -> Self {
        Self::VersionQuery {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn test_run(message: impl Into<String>) -> Self {
        Self::TestRun {
            message: message.into(),
        }
    }

    /// Wrap an error with the index of the test target that produced it.
    pub fn target(index: usize, source: Error) -> Self {
        Self::Target {
            index,
            source: Box::new(source),
        }
    }

    /// Join per-target failures into one error, or `None` if there are none.
    pub fn aggregate(errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self::Aggregate(errors))
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Log setup failures with a description of the step that failed. The
/// error itself passes through unchanged.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
