//! Result collection for test runs

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use xtm_core::prelude::*;
use xtm_core::{TestCase, TestCaseStatus, TestFailure, TestSuite};
use xtm_daemon::{RunnerEvent, TestSink};

/// Most recent runner output lines kept in memory
const OUTPUT_BUFFER_LINES: usize = 1000;

#[derive(Debug, Default)]
struct ListenerState {
    suites: Vec<TestSuite>,
    /// Indices into `suites` of suites that started but did not finish
    open_suites: Vec<usize>,
    error: Option<String>,
    output: VecDeque<String>,
}

impl ListenerState {
    fn current_suite(&mut self, fallback_name: &str) -> &mut TestSuite {
        let index = match self.open_suites.last() {
            Some(index) => *index,
            None => {
                self.suites.push(TestSuite::new(fallback_name));
                let index = self.suites.len() - 1;
                self.open_suites.push(index);
                index
            }
        };
        &mut self.suites[index]
    }

    fn find_case(&mut self, class_name: &str, method_name: &str) -> Option<&mut TestCase> {
        let index = *self.open_suites.last()?;
        self.suites[index]
            .cases
            .iter_mut()
            .rev()
            .find(|c| c.class_name == class_name && c.method_name == method_name)
    }
}

/// The provided [`TestSink`]: turns runner callbacks into [`TestSuite`]s.
///
/// Completes when the runner finishes the test plan or when the run is
/// failed through [`TestSink::finish_with_error`].
pub struct TestListener {
    state: Mutex<ListenerState>,
    done_tx: watch::Sender<bool>,
}

impl Default for TestListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TestListener {
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(ListenerState::default()),
            done_tx,
        }
    }

    /// Runner output collected so far, oldest first.
    pub fn output(&self) -> Vec<String> {
        self.lock().output.iter().cloned().collect()
    }

    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mark_done(&self) {
        self.done_tx.send_replace(true);
    }
}

fn parse_timestamp(at: &str) -> DateTime<Utc> {
    DateTime::parse_from_str(at, "%Y-%m-%d %H:%M:%S %z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl TestSink for TestListener {
    fn reset(&self) {
        *self.lock() = ListenerState::default();
        self.done_tx.send_replace(false);
    }

    fn finish_with_error(&self, error: String) {
        {
            let mut state = self.lock();
            if state.error.is_none() {
                state.error = Some(error);
            } else {
                debug!("Run already failed, ignoring: {}", error);
            }
        }
        self.mark_done();
    }

    fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    fn suites(&self) -> Vec<TestSuite> {
        self.lock().suites.clone()
    }

    fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    fn write_output(&self, line: &str) {
        let mut state = self.lock();
        if state.output.len() >= OUTPUT_BUFFER_LINES {
            state.output.pop_front();
        }
        state.output.push_back(line.to_string());
    }

    fn on_event(&self, event: RunnerEvent) {
        match event {
            RunnerEvent::PlanStarted => info!("Test plan started"),
            RunnerEvent::SuiteStarted { suite, at } => {
                debug!("Suite '{}' started", suite);
                let mut state = self.lock();
                let mut record = TestSuite::new(suite);
                record.started_at = parse_timestamp(&at);
                state.suites.push(record);
                let index = state.suites.len() - 1;
                state.open_suites.push(index);
            }
            RunnerEvent::CaseStarted {
                class_name,
                method_name,
            } => {
                debug!("{}/{} started", class_name, method_name);
                let mut state = self.lock();
                state
                    .current_suite(&class_name)
                    .cases
                    .push(TestCase::new(class_name, method_name));
            }
            RunnerEvent::CaseFailed {
                class_name,
                method_name,
                message,
                file,
                line,
            } => {
                warn!("{}/{} failed: {} ({}:{})", class_name, method_name, message, file, line);
                let mut state = self.lock();
                match state.find_case(&class_name, &method_name) {
                    Some(case) => {
                        case.status = TestCaseStatus::Failed;
                        case.failure = Some(TestFailure {
                            message,
                            file,
                            line,
                        });
                    }
                    None => debug!("Failure for unknown case {}/{}", class_name, method_name),
                }
            }
            RunnerEvent::CaseFinished {
                class_name,
                method_name,
                status,
                duration,
            } => {
                info!("{}/{} {:?} in {:.3}s", class_name, method_name, status, duration);
                let mut state = self.lock();
                if state.find_case(&class_name, &method_name).is_none() {
                    state
                        .current_suite(&class_name)
                        .cases
                        .push(TestCase::new(class_name.clone(), method_name.clone()));
                }
                if let Some(case) = state.find_case(&class_name, &method_name) {
                    case.status = status;
                    case.duration = duration;
                }
            }
            RunnerEvent::SuiteFinished {
                suite,
                at,
                run_count,
                failures,
                total_duration,
                ..
            } => {
                info!(
                    "Suite '{}' finished: {} run, {} failed",
                    suite, run_count, failures
                );
                let mut state = self.lock();
                let position = state
                    .open_suites
                    .iter()
                    .rposition(|i| state.suites[*i].name == suite);
                if let Some(position) = position {
                    let index = state.open_suites.remove(position);
                    let record = &mut state.suites[index];
                    record.finished_at = Some(parse_timestamp(&at));
                    record.total_duration = total_duration;
                }
            }
            RunnerEvent::PlanFinished => {
                info!("Test plan finished");
                self.mark_done();
            }
            RunnerEvent::Log(message) => info!("runner: {}", message),
            RunnerEvent::DebugLog(message) => debug!("runner: {}", message),
            RunnerEvent::BootstrapFailed(reason) => {
                self.finish_with_error(format!("test runner failed to bootstrap: {reason}"));
            }
            RunnerEvent::UiTestingInitFailed(reason) => {
                self.finish_with_error(format!(
                    "UI testing initialization failed: {reason}"
                ));
            }
            RunnerEvent::BundleReady { .. } | RunnerEvent::RunnerReady { .. } => {}
        }
    }
}
