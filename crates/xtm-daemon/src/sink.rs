//! Destination for everything a test run produces

use tokio::sync::watch;

use xtm_core::TestSuite;

use crate::protocol::RunnerEvent;

/// Collects results, runner output and the terminal state of a run.
///
/// Shared between the orchestrator, the inbound dispatcher (transport
/// receive loop) and the stdout forwarding task.
pub trait TestSink: Send + Sync {
    /// Clear results and the done flag before a new target.
    fn reset(&self);

    /// Record a terminal failure and signal completion.
    fn finish_with_error(&self, error: String);

    /// Flips to `true` once the run is over.
    fn done(&self) -> watch::Receiver<bool>;

    /// Suites collected so far.
    fn suites(&self) -> Vec<TestSuite>;

    /// The recorded failure, if any.
    fn error(&self) -> Option<String>;

    /// One line of runner standard output.
    fn write_output(&self, line: &str);

    /// A decoded runner callback.
    fn on_event(&self, event: RunnerEvent);
}
