//! Test result records assembled from runner callbacks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseStatus {
    #[default]
    Running,
    Passed,
    Failed,
    Skipped,
    ExpectedFailure,
}

impl TestCaseStatus {
    /// Map the status string reported by the runner.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "passed" => TestCaseStatus::Passed,
            "failed" => TestCaseStatus::Failed,
            "skipped" => TestCaseStatus::Skipped,
            "expected failure" | "expected-failure" => TestCaseStatus::ExpectedFailure,
            _ => TestCaseStatus::Failed,
        }
    }
}

/// Failure location and message reported for a test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub message: String,
    pub file: String,
    pub line: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub class_name: String,
    pub method_name: String,
    pub status: TestCaseStatus,
    /// Seconds, as reported by the runner
    pub duration: f64,
    pub started_at: DateTime<Utc>,
    pub failure: Option<TestFailure>,
}

impl TestCase {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            status: TestCaseStatus::Running,
            duration: 0.0,
            started_at: Utc::now(),
            failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cases: Vec<TestCase>,
    pub total_duration: f64,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            finished_at: None,
            cases: Vec::new(),
            total_duration: 0.0,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| c.status == TestCaseStatus::Failed)
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
