//! Test runner process supervision

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use xtm_core::prelude::*;

use crate::sink::TestSink;
use crate::transport::DeviceServices;

/// Result of a kill request. Both count as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    AlreadyExited,
}

/// Handle to the launched runner.
///
/// Owned by exactly one orchestrator; nothing else kills it.
#[derive(Debug)]
pub struct RunnerProcess {
    pid: u64,
    killed: AtomicBool,
}

impl RunnerProcess {
    pub fn new(pid: u64) -> Self {
        Self {
            pid,
            killed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Kill the runner. Idempotent: only the first call reaches the device,
    /// and a process that is already gone is not an error.
    pub async fn kill<D: DeviceServices>(&self, device: &D) -> KillOutcome {
        if self.killed.swap(true, Ordering::AcqRel) {
            debug!("Runner {} already killed", self.pid);
            return KillOutcome::AlreadyExited;
        }

        match device.kill_process(self.pid).await {
            Ok(()) => {
                info!("Killed test runner pid {}", self.pid);
                KillOutcome::Killed
            }
            Err(e) => {
                let err = match e {
                    Error::Kill { .. } => e,
                    other => Error::kill(self.pid, other.to_string()),
                };
                warn!("{} (treating as already exited)", err);
                KillOutcome::AlreadyExited
            }
        }
    }
}

/// Copy runner stdout into the sink line by line until EOF.
pub fn spawn_output_forwarder<R>(stdout: R, sink: Arc<dyn TestSink>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();

        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    trace!("runner: {}", line);
                    sink.write_output(&line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Runner output read failed: {}", e);
                    break;
                }
            }
        }

        debug!("Runner output forwarder finished");
    })
}
