#![allow(dead_code)]

use lbprobe::runner::TestRunner;
use lbprobe::supervisor::WorkerCommand;
use lbprobe_common::config::ApiSettings;
use lbprobe_common::types::{Credentials, ExpectedOutcome, ExecutionResult, Operation, TestCase, TestStatus};
use lbprobe_mock::{MockBehavior, MockServer};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";
pub const POOL: &str = "vs-web";
pub const BROKEN_POOL: &str = "vs-broken";

/// Mock with one account, one healthy pool and one pool that always answers 500
pub fn behavior() -> MockBehavior {
    MockBehavior::new()
        .with_user(USERNAME, PASSWORD)
        .with_pool(POOL)
        .with_failing_pool(BROKEN_POOL, 500)
}

pub fn start_mock(behavior: MockBehavior) -> MockServer {
    MockServer::start(behavior).expect("mock API should start")
}

pub fn settings_for(server: &MockServer) -> ApiSettings {
    ApiSettings {
        base_url: server.base_url(),
        timeout: Duration::from_secs(5),
        credentials: Credentials::new(USERNAME, PASSWORD),
    }
}

pub fn runner_for(server: &MockServer) -> TestRunner {
    TestRunner::new(settings_for(server)).expect("runner should build")
}

/// Worker processes are this package's own binary
pub fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_lbprobe")).arg("worker")
}

pub fn make_case(id: &str, operation: Operation, pool: &str) -> TestCase {
    TestCase {
        id: id.to_string(),
        name: format!("{} {}", operation, pool),
        operation,
        target_virtual_service: pool.to_string(),
        expected_outcome: ExpectedOutcome::Success,
        credentials: None,
    }
}

/// login, disable, enable, logout, then the same again: ids t-1..t-8
pub fn mixed_cases() -> Vec<TestCase> {
    [
        Operation::Login,
        Operation::DisablePool,
        Operation::EnablePool,
        Operation::Logout,
    ]
    .iter()
    .cycle()
    .take(8)
    .enumerate()
    .map(|(idx, operation)| make_case(&format!("t-{}", idx + 1), *operation, POOL))
    .collect()
}

pub fn statuses(results: &[ExecutionResult]) -> Vec<TestStatus> {
    results.iter().map(|r| r.status).collect()
}

pub fn case_ids(cases: &[TestCase]) -> Vec<String> {
    cases.iter().map(|c| c.id.clone()).collect()
}

pub fn ids(results: &[ExecutionResult]) -> Vec<String> {
    results.iter().map(|r| r.test_id.clone()).collect()
}

/// Write a run configuration into a fresh temporary directory
pub fn write_config(base_url: &str, password: &str, method: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test_config.yaml");
    let content = format!(
        r#"api:
  base_url: "{base_url}"
  timeout: 5
credentials:
  username: {USERNAME}
  password: {password}
target_virtual_service: {POOL}
parallelism:
  method: {method}
  thread_count: 2
test_cases:
  - id: login-ok
    operation: login
  - id: disable-web
    operation: disable_pool
  - id: enable-web
    operation: enable_pool
  - id: logout-ok
    operation: logout
"#
    );
    std::fs::write(&path, content).expect("write config");
    (dir, path)
}
