//! Entry point for a single test target: pick the orchestrator by iOS version

use std::sync::Arc;

use tokio::sync::watch;

use xtm_core::prelude::*;
use xtm_core::{ProtocolGeneration, TestConfig};
use xtm_daemon::{Archiver, DeviceServices, TestSink};

use crate::session::{RunOutcome, SessionContext, SessionOrchestrator};

/// Routes test runs to the orchestrator matching the device's OS version.
pub struct VersionDispatcher<'a, D> {
    device: &'a D,
    archiver: &'a dyn Archiver,
}

impl<'a, D: DeviceServices> VersionDispatcher<'a, D> {
    pub fn new(device: &'a D, archiver: &'a dyn Archiver) -> Self {
        Self { device, archiver }
    }

    /// Query the device version and return the generation it speaks.
    pub async fn generation(&self) -> Result<ProtocolGeneration> {
        let version = self.device.product_version().await.map_err(|e| match e {
            Error::VersionQuery { .. } | Error::InvalidVersion(_) => e,
            other => Error::version_query(other.to_string()),
        })?;
        let generation = ProtocolGeneration::for_version(version);
        info!(
            "Device {} runs iOS {}, using the {} protocol",
            self.device.udid(),
            version,
            generation
        );
        Ok(generation)
    }

    /// Run one test target and wait for it to finish.
    pub async fn run_test(
        &self,
        config: &TestConfig,
        sink: Arc<dyn TestSink>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutcome> {
        config.validate()?;
        let generation = self.generation().await?;

        let ctx = SessionContext {
            device: self.device,
            config,
            sink,
            archiver: self.archiver,
            cancel,
        };
        SessionOrchestrator::for_generation(generation)
            .run(&ctx)
            .await
    }
}
