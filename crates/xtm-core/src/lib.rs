//! # xtm-core - Core Domain Types
//!
//! Foundation crate for the XCTest session manager. Provides domain types,
//! error handling, result records and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing, uuid).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`OsVersion`] - Device OS version, ordered
//! - [`ProtocolGeneration`] - Legacy / mid / modern testmanagerd protocol
//! - [`SessionId`] - Run-scoped UUID with its canonical uppercase form
//! - [`Capabilities`] - Negotiated feature flags
//! - [`AppInfo`] - Installed application metadata
//!
//! ### Test Configuration (`test_config`)
//! - [`TestConfig`] - One test target to execute
//! - [`XcTestConfiguration`] - Session configuration handed to the runner
//!
//! ### Results (`results`)
//! - [`TestSuite`], [`TestCase`], [`TestCaseStatus`], [`TestFailure`]
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use xtm_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod results;
pub mod test_config;
pub mod types;

pub use error::{Error, Result, ResultExt};
pub use results::{TestCase, TestCaseStatus, TestFailure, TestSuite};
pub use test_config::{TestConfig, XcTestConfiguration};
pub use types::{AppInfo, Capabilities, OsVersion, ProtocolGeneration, SessionId};
