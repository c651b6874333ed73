use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// API operation exercised by a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Login,
    EnablePool,
    DisablePool,
    Logout,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Login => write!(f, "login"),
            Operation::EnablePool => write!(f, "enable_pool"),
            Operation::DisablePool => write!(f, "disable_pool"),
            Operation::Logout => write!(f, "logout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    #[default]
    Success,
    Failure,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Passwords end up next to tracing fields; keep them out of Debug output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A declarative API test case, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub operation: Operation,
    pub target_virtual_service: String,
    pub expected_outcome: ExpectedOutcome,
    /// Overrides the run credentials for this case only (negative login cases)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Succeeded,
    Failed,
    Errored,
    Cancelled,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Succeeded => write!(f, "SUCCEEDED"),
            TestStatus::Failed => write!(f, "FAILED"),
            TestStatus::Errored => write!(f, "ERRORED"),
            TestStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Outcome of exactly one test case execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub test_id: String,
    pub status: TestStatus,
    pub duration: Duration,
    pub detail: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(test_id: &str, duration: Duration) -> Self {
        Self {
            test_id: test_id.to_string(),
            status: TestStatus::Succeeded,
            duration,
            detail: None,
        }
    }

    pub fn failed(test_id: &str, duration: Duration, detail: impl Into<String>) -> Self {
        Self {
            test_id: test_id.to_string(),
            status: TestStatus::Failed,
            duration,
            detail: Some(detail.into()),
        }
    }

    pub fn errored(test_id: &str, duration: Duration, detail: impl Into<String>) -> Self {
        Self {
            test_id: test_id.to_string(),
            status: TestStatus::Errored,
            duration,
            detail: Some(detail.into()),
        }
    }

    /// A test that was never started
    pub fn cancelled(test_id: &str, detail: impl Into<String>) -> Self {
        Self {
            test_id: test_id.to_string(),
            status: TestStatus::Cancelled,
            duration: Duration::ZERO,
            detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TestStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    /// Single pass over completed results
    pub fn tally<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> Self {
        let mut counts = Self::default();
        for result in results {
            match result.status {
                TestStatus::Succeeded => counts.succeeded += 1,
                TestStatus::Failed => counts.failed += 1,
                TestStatus::Errored => counts.errored += 1,
                TestStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.errored + self.cancelled
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.cancelled == 0
    }
}

/// Aggregated outcome of one run.
///
/// Built once by the orchestrator; fields are read-only from the outside.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    run_id: Uuid,
    strategy: String,
    results: Vec<ExecutionResult>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    elapsed: Duration,
    counts: StatusCounts,
}

impl RunReport {
    pub fn new(
        strategy: impl Into<String>,
        results: Vec<ExecutionResult>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let counts = StatusCounts::tally(&results);
        Self {
            run_id: Uuid::new_v4(),
            strategy: strategy.into(),
            results,
            started_at,
            finished_at,
            elapsed,
            counts,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    pub fn is_success(&self) -> bool {
        self.counts.all_succeeded()
    }

    /// Every result that did not succeed, in submission order
    pub fn non_succeeded(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}
