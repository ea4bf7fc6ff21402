//! # xtm-daemon - testmanagerd Protocol Plumbing
//!
//! Everything that talks to the device's test-management daemon: the
//! collaborator traits for the transport, the RPC selectors and typed reply
//! decoding, the proxy channel facades and the runner process handle.
//!
//! Depends on [`xtm_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Transport Contracts
//! - [`Connection`] - One multiplexed RPC connection (`trait_variant` Send form of [`LocalConnection`])
//! - [`DeviceServices`] - Version query, app listing, file push, launch and kill (Send form of [`LocalDeviceServices`])
//! - [`MessageDispatcher`] - Handler for inbound calls on a requested channel
//! - [`Archiver`] - Keyed-archive serializer used for pushed configurations
//!
//! ### Protocol
//! - [`protocol`] - Service names, channel names, selectors, [`Decoded`] replies
//! - [`RunnerEvent`] - Decoded runner callbacks
//! - [`ProtocolProxy`] - Binds the proxy channel into [`IdeInterface`] + [`DaemonInterface`]
//! - [`ProxyDispatcher`] - Serves the configuration and forwards callbacks
//!
//! ### Apps & Processes
//! - [`InstalledApp`], [`resolve_app()`] - Exact bundle id lookup
//! - [`RunnerProcess`] - Idempotent kill of the launched runner
//! - [`spawn_output_forwarder()`] - Copy runner stdout into a [`TestSink`]

pub mod apps;
pub mod archive;
pub mod dispatcher;
pub mod process;
pub mod protocol;
pub mod proxy;
pub mod sink;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod transport;

// Public API re-exports
pub use apps::{resolve_app, InstalledApp};
#[cfg(any(test, feature = "test-helpers"))]
pub use archive::MockArchiver;
pub use archive::{describe_payload, ArchivedValue, Archiver};
pub use dispatcher::{BundleReady, ProxyDispatcher};
pub use process::{spawn_output_forwarder, KillOutcome, RunnerProcess};
pub use protocol::{Decoded, RunnerEvent};
pub use proxy::{DaemonInterface, IdeInterface, ProtocolProxy};
pub use sink::TestSink;
pub use transport::{
    ChannelCode, CloseReason, Connection, DeviceServices, InboundMessage, LaunchRequest,
    LaunchedApp, LocalConnection, LocalDeviceServices, MessageDispatcher,
};
