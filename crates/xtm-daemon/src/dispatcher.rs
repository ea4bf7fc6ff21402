//! Inbound side of the proxy channel

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use xtm_core::prelude::*;
use xtm_core::XcTestConfiguration;

use crate::archive::ArchivedValue;
use crate::protocol::RunnerEvent;
use crate::sink::TestSink;
use crate::transport::{InboundMessage, MessageDispatcher};

/// `(protocol_version, minimum_version)` announced by the test bundle
pub type BundleReady = (u64, u64);

/// Handles runner callbacks arriving on the proxy channel.
///
/// Answers the runner's configuration request, fires the bundle-ready
/// one-shot exactly once and forwards everything else to the sink.
pub struct ProxyDispatcher {
    configuration: XcTestConfiguration,
    ready_tx: Mutex<Option<oneshot::Sender<BundleReady>>>,
    sink: Arc<dyn TestSink>,
}

impl ProxyDispatcher {
    pub fn new(
        configuration: XcTestConfiguration,
        sink: Arc<dyn TestSink>,
    ) -> (Self, oneshot::Receiver<BundleReady>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let dispatcher = Self {
            configuration,
            ready_tx: Mutex::new(Some(ready_tx)),
            sink,
        };
        (dispatcher, ready_rx)
    }

    fn bundle_ready(&self, protocol_version: u64, minimum_version: u64) {
        info!(
            "Test bundle ready, protocol version {}, minimum {}",
            protocol_version, minimum_version
        );

        let sender = match self.ready_tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                if tx.send((protocol_version, minimum_version)).is_err() {
                    debug!("Nobody is waiting for bundle ready");
                }
            }
            None => debug!("Duplicate bundle ready callback ignored"),
        }
    }
}

impl MessageDispatcher for ProxyDispatcher {
    fn dispatch(&self, message: InboundMessage) -> Option<Vec<ArchivedValue>> {
        let event = match RunnerEvent::decode(&message.selector, &message.arguments) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Unhandled runner callback: {}", message.selector);
                return None;
            }
            Err(e) => {
                warn!("Malformed runner callback: {}", e);
                return None;
            }
        };

        match event {
            RunnerEvent::BundleReady {
                protocol_version,
                minimum_version,
            } => {
                self.bundle_ready(protocol_version, minimum_version);
                None
            }
            RunnerEvent::RunnerReady { capabilities } => {
                info!("Runner ready with capabilities: {:?}", capabilities);
                Some(vec![ArchivedValue::from(self.configuration.clone())])
            }
            event => {
                self.sink.on_event(event);
                None
            }
        }
    }
}
