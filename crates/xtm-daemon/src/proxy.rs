//! Typed facades over the testmanagerd proxy channel
//!
//! [`ProtocolProxy::bind`] opens the proxy channel on one connection and
//! splits it into the two directions of the conversation:
//!
//! - [`IdeInterface`]: what the runner tells us (bundle ready, results)
//! - [`DaemonInterface`]: what we ask the daemon, one method per selector

use std::sync::Arc;

use tokio::sync::oneshot;

use xtm_core::prelude::*;
use xtm_core::{Capabilities, SessionId, XcTestConfiguration};

use crate::archive::ArchivedValue;
use crate::dispatcher::{BundleReady, ProxyDispatcher};
use crate::protocol::{self, selectors, DRIVER_CHANNEL, PROXY_CHANNEL};
use crate::sink::TestSink;
use crate::transport::{ChannelCode, Connection};

pub struct ProtocolProxy;

impl ProtocolProxy {
    /// Request the proxy channel on `connection` with an inbound dispatcher
    /// that serves `configuration` to the runner.
    pub async fn bind<'c, C>(
        connection: &'c C,
        configuration: XcTestConfiguration,
        sink: Arc<dyn TestSink>,
    ) -> Result<(IdeInterface, DaemonInterface<'c, C>)>
    where
        C: Connection + Sync,
    {
        let (dispatcher, ready_rx) = ProxyDispatcher::new(configuration, sink);
        let channel = connection
            .request_channel(PROXY_CHANNEL, Some(Arc::new(dispatcher)))
            .await?;
        debug!(
            "Proxy channel {} open on {}",
            channel,
            connection.service()
        );

        Ok((
            IdeInterface {
                ready_rx: Some(ready_rx),
            },
            DaemonInterface {
                connection,
                channel,
            },
        ))
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────

/// Runner-to-IDE direction of the proxy channel.
#[derive(Debug)]
pub struct IdeInterface {
    ready_rx: Option<oneshot::Receiver<BundleReady>>,
}

impl IdeInterface {
    /// Wait for `_XCT_testBundleReadyWithProtocolVersion:minimumVersion:`.
    ///
    /// Returns `(protocol_version, minimum_version)`. The event is delivered
    /// once; waiting again is an error.
    pub async fn test_bundle_ready(&mut self) -> Result<BundleReady> {
        let rx = self
            .ready_rx
            .take()
            .ok_or_else(|| Error::protocol("test bundle ready was already consumed"))?;

        rx.await
            .map_err(|_| Error::connection_lost("proxy channel dropped before the test bundle was ready"))
    }
}

// ─────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────

/// IDE-to-daemon direction of the proxy channel.
pub struct DaemonInterface<'c, C> {
    connection: &'c C,
    channel: ChannelCode,
}

impl<'c, C> DaemonInterface<'c, C>
where
    C: Connection + Sync,
{
    pub fn channel(&self) -> ChannelCode {
        self.channel
    }

    async fn invoke(
        &self,
        channel: ChannelCode,
        selector: &'static str,
        arguments: Vec<ArchivedValue>,
    ) -> Result<Vec<ArchivedValue>> {
        debug!("-> {} on {}", selector, channel);
        self.connection
            .call(channel, selector, arguments)
            .await
            .map_err(|e| into_call_failed(selector, e))
    }

    /// `_IDE_initiateSessionWithIdentifier:capabilities:`, returns the
    /// daemon's capabilities.
    pub async fn initiate_session_with_capabilities(
        &self,
        session_id: SessionId,
        capabilities: Capabilities,
    ) -> Result<Capabilities> {
        let selector = selectors::INITIATE_SESSION_WITH_CAPABILITIES;
        let payload = self
            .invoke(
                self.channel,
                selector,
                vec![ArchivedValue::Uuid(*session_id.as_uuid()), capabilities.into()],
            )
            .await?;
        protocol::decode_capabilities(&payload).into_result(selector, &payload)
    }

    pub async fn initiate_control_session_with_capabilities(
        &self,
        capabilities: Capabilities,
    ) -> Result<Capabilities> {
        let selector = selectors::INITIATE_CONTROL_SESSION_WITH_CAPABILITIES;
        let payload = self
            .invoke(self.channel, selector, vec![capabilities.into()])
            .await?;
        protocol::decode_capabilities(&payload).into_result(selector, &payload)
    }

    /// Returns whether the daemon accepted the runner's pid.
    pub async fn authorize_test_session(&self, pid: u64) -> Result<bool> {
        let selector = selectors::AUTHORIZE_TEST_SESSION;
        let payload = self
            .invoke(self.channel, selector, vec![ArchivedValue::UInt(pid)])
            .await?;
        protocol::decode_bool(&payload).into_result(selector, &payload)
    }

    /// Open the outbound-only driver channel on the same connection.
    pub async fn request_driver_channel(&self) -> Result<ChannelCode> {
        let channel = self.connection.request_channel(DRIVER_CHANNEL, None).await?;
        debug!("Driver channel {} open", channel);
        Ok(channel)
    }

    /// Fire-and-forget on the driver channel.
    pub async fn start_executing_test_plan(
        &self,
        driver: ChannelCode,
        protocol_version: u64,
    ) -> Result<()> {
        let selector = selectors::START_EXECUTING_TEST_PLAN;
        debug!("-> {} on {}", selector, driver);
        self.connection
            .call_async(driver, selector, vec![ArchivedValue::UInt(protocol_version)])
            .await
            .map_err(|e| into_call_failed(selector, e))
    }

    /// `_IDE_initiateSessionWithIdentifier:forClient:atPath:protocolVersion:`
    pub async fn initiate_session_with_identifier(
        &self,
        session_id: SessionId,
        client: &str,
        path: &str,
        protocol_version: u64,
    ) -> Result<u64> {
        let selector = selectors::INITIATE_SESSION_WITH_IDENTIFIER;
        let payload = self
            .invoke(
                self.channel,
                selector,
                vec![
                    ArchivedValue::Uuid(*session_id.as_uuid()),
                    ArchivedValue::Str(client.to_string()),
                    ArchivedValue::Str(path.to_string()),
                    ArchivedValue::UInt(protocol_version),
                ],
            )
            .await?;
        protocol::decode_token(&payload).into_result(selector, &payload)
    }

    /// The reply carries nothing we use.
    pub async fn initiate_control_session_for_process(
        &self,
        pid: u64,
        protocol_version: u64,
    ) -> Result<()> {
        self.invoke(
            self.channel,
            selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS,
            vec![ArchivedValue::UInt(pid), ArchivedValue::UInt(protocol_version)],
        )
        .await?;
        Ok(())
    }

    pub async fn initiate_control_session_with_protocol_version(
        &self,
        protocol_version: u64,
    ) -> Result<u64> {
        let selector = selectors::INITIATE_CONTROL_SESSION_WITH_PROTOCOL_VERSION;
        let payload = self
            .invoke(
                self.channel,
                selector,
                vec![ArchivedValue::UInt(protocol_version)],
            )
            .await?;
        protocol::decode_token(&payload).into_result(selector, &payload)
    }
}

fn into_call_failed(selector: &str, error: Error) -> Error {
    match error {
        Error::CallFailed { .. } | Error::UnexpectedReply { .. } => error,
        other => Error::call_failed(selector, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_configuration, DeviceCall, FakeDevice, RecordingSink};
    use crate::transport::DeviceServices;

    async fn bound(device: &FakeDevice) -> crate::test_utils::FakeConnection {
        device
            .open_connection(protocol::MODERN_SERVICE)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_requests_proxy_channel() {
        let device = FakeDevice::new("17.0");
        let conn = bound(&device).await;
        let sink = Arc::new(RecordingSink::default());

        let (_ide, daemon) = ProtocolProxy::bind(&conn, test_configuration(), sink)
            .await
            .unwrap();

        assert!(device.calls().contains(&DeviceCall::RequestChannel {
            connection: 0,
            identifier: PROXY_CHANNEL.to_string(),
        }));
        assert_eq!(daemon.channel(), ChannelCode(1));
    }

    #[tokio::test]
    async fn test_authorize_decodes_bool() {
        let device = FakeDevice::new("17.0")
            .reply(selectors::AUTHORIZE_TEST_SESSION, vec![ArchivedValue::Bool(true)]);
        let conn = bound(&device).await;
        let (_ide, daemon) = ProtocolProxy::bind(
            &conn,
            test_configuration(),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        assert!(daemon.authorize_test_session(1234).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let device = FakeDevice::new("17.0").reply(
            selectors::AUTHORIZE_TEST_SESSION,
            vec![ArchivedValue::Str("nope".into())],
        );
        let conn = bound(&device).await;
        let (_ide, daemon) = ProtocolProxy::bind(
            &conn,
            test_configuration(),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        let err = daemon.authorize_test_session(1234).await.unwrap_err();
        match err {
            Error::UnexpectedReply {
                selector, payload, ..
            } => {
                assert_eq!(selector, selectors::AUTHORIZE_TEST_SESSION);
                assert!(payload.contains("nope"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_reply_for_every_decoded_call() {
        let garbage = vec![ArchivedValue::Data(vec![0xde, 0xad])];
        let device = FakeDevice::new("17.0")
            .reply(selectors::INITIATE_SESSION_WITH_CAPABILITIES, garbage.clone())
            .reply(selectors::INITIATE_CONTROL_SESSION_WITH_CAPABILITIES, garbage.clone())
            .reply(selectors::INITIATE_SESSION_WITH_IDENTIFIER, garbage.clone())
            .reply(
                selectors::INITIATE_CONTROL_SESSION_WITH_PROTOCOL_VERSION,
                garbage.clone(),
            );
        let conn = bound(&device).await;
        let (_ide, daemon) = ProtocolProxy::bind(
            &conn,
            test_configuration(),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        let errors = vec![
            daemon
                .initiate_session_with_capabilities(SessionId::new(), Capabilities::new())
                .await
                .unwrap_err(),
            daemon
                .initiate_control_session_with_capabilities(Capabilities::new())
                .await
                .unwrap_err(),
            daemon
                .initiate_session_with_identifier(SessionId::new(), "c", "/p", 36)
                .await
                .unwrap_err(),
            daemon
                .initiate_control_session_with_protocol_version(36)
                .await
                .unwrap_err(),
        ];

        for err in errors {
            assert!(matches!(err, Error::UnexpectedReply { .. }), "{err:?}");
            assert!(err.to_string().contains("<2 bytes>"));
        }
    }

    #[tokio::test]
    async fn test_transport_failure_names_selector() {
        let device =
            FakeDevice::new("17.0").fail_call(selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS);
        let conn = bound(&device).await;
        let (_ide, daemon) = ProtocolProxy::bind(
            &conn,
            test_configuration(),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        let err = daemon
            .initiate_control_session_for_process(42, 25)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::CallFailed { selector, .. }
                if selector == selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS
        ));
    }

    #[tokio::test]
    async fn test_start_plan_goes_to_driver_channel() {
        let device = FakeDevice::new("17.0");
        let conn = bound(&device).await;
        let (_ide, daemon) = ProtocolProxy::bind(
            &conn,
            test_configuration(),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        let driver = daemon.request_driver_channel().await.unwrap();
        daemon.start_executing_test_plan(driver, 36).await.unwrap();

        assert!(device.calls().contains(&DeviceCall::CallAsync {
            connection: 0,
            channel: driver.0,
            selector: selectors::START_EXECUTING_TEST_PLAN.to_string(),
        }));
    }

    #[tokio::test]
    async fn test_bundle_ready_consumed_once() {
        let device = FakeDevice::new("13.0");
        let conn = bound(&device).await;
        let (mut ide, _daemon) = ProtocolProxy::bind(
            &conn,
            test_configuration(),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        device.emit(
            0,
            PROXY_CHANNEL,
            crate::transport::InboundMessage::new(
                selectors::TEST_BUNDLE_READY,
                vec![ArchivedValue::UInt(25), ArchivedValue::UInt(8)],
            ),
        );

        assert_eq!(ide.test_bundle_ready().await.unwrap(), (25, 8));
        assert!(ide.test_bundle_ready().await.is_err());
    }
}
