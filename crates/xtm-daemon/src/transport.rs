//! Collaborator contracts for the device transport
//!
//! The byte-level channel codec, device tunneling and the app services live
//! outside this workspace. Orchestrators only see these traits.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncRead;

use xtm_core::prelude::*;
use xtm_core::OsVersion;

use crate::apps::InstalledApp;
use crate::archive::ArchivedValue;

/// Numeric code of a channel inside one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelCode(pub i32);

impl fmt::Display for ChannelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A call the device makes to us on a channel we requested.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub selector: String,
    pub arguments: Vec<ArchivedValue>,
    pub expects_reply: bool,
}

impl InboundMessage {
    pub fn new(selector: impl Into<String>, arguments: Vec<ArchivedValue>) -> Self {
        Self {
            selector: selector.into(),
            arguments,
            expects_reply: false,
        }
    }

    pub fn expecting_reply(mut self) -> Self {
        self.expects_reply = true;
        self
    }
}

/// Handles inbound calls on a named channel.
///
/// Invoked from the transport's receive loop, so it must not block.
pub trait MessageDispatcher: Send + Sync {
    /// Returns the reply payload for calls that expect one.
    fn dispatch(&self, message: InboundMessage) -> Option<Vec<ArchivedValue>>;
}

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by us, or the peer ended the stream cleanly
    Normal,
    /// Anything else: read errors, resets, decode failures
    Abnormal(String),
}

impl CloseReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, CloseReason::Normal)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Normal => write!(f, "connection closed"),
            CloseReason::Abnormal(reason) => write!(f, "{reason}"),
        }
    }
}

/// One multiplexed RPC connection to a daemon service.
///
/// Each connection runs its own receive loop; dispatchers are invoked from it.
#[trait_variant::make(Connection: Send)]
pub trait LocalConnection {
    /// The service this connection was opened against.
    fn service(&self) -> &str;

    /// Open a named channel, optionally handling inbound calls on it.
    async fn request_channel(
        &self,
        identifier: &str,
        dispatcher: Option<Arc<dyn MessageDispatcher>>,
    ) -> Result<ChannelCode>;

    /// Send a call and wait for its reply payload.
    async fn call(
        &self,
        channel: ChannelCode,
        selector: &str,
        arguments: Vec<ArchivedValue>,
    ) -> Result<Vec<ArchivedValue>>;

    /// Send a call without waiting for a reply.
    async fn call_async(
        &self,
        channel: ChannelCode,
        selector: &str,
        arguments: Vec<ArchivedValue>,
    ) -> Result<()>;

    /// Resolves once the connection has stopped, for whatever reason.
    async fn closed(&self);

    /// Reason the connection stopped, `None` while it is open.
    fn last_error(&self) -> Option<CloseReason>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Launch parameters for an installed app.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchRequest {
    pub bundle_id: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub options: BTreeMap<String, ArchivedValue>,
}

/// A launched process with its captured standard output.
pub struct LaunchedApp {
    pub pid: u64,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for LaunchedApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedApp")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Device-side services consumed by the orchestrators.
#[trait_variant::make(DeviceServices: Send)]
pub trait LocalDeviceServices: Send + Sync {
    type Connection: Connection + Sync + 'static;

    fn udid(&self) -> &str;

    /// `ProductVersion` as reported by lockdown.
    async fn product_version(&self) -> Result<OsVersion>;

    /// Open a fresh connection to a daemon service.
    async fn open_connection(&self, service: &str) -> Result<Self::Connection>;

    /// List user-installed apps with their path and environment attributes.
    async fn browse_user_apps(&self) -> Result<Vec<InstalledApp>>;

    /// Write a file into an app's sandbox, relative to its container.
    async fn push_file(
        &self,
        bundle_id: &str,
        contents: Vec<u8>,
        relative_path: &str,
    ) -> Result<()>;

    /// Launch an app with stdio captured.
    async fn launch_app(&self, request: LaunchRequest) -> Result<LaunchedApp>;

    /// Kill a process. Fails if the pid is not running.
    async fn kill_process(&self, pid: u64) -> Result<()>;
}
