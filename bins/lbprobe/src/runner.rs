// Per-test runner: one test case in, one ExecutionResult out

use crate::client::{ApiClient, ClientError, PoolState};
use crate::evaluator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lbprobe_common::config::ApiSettings;
use lbprobe_common::types::{Credentials, ExecutionResult, Operation, TestCase};
use reqwest::Url;
use std::time::Instant;
use tracing::debug;

/// What every strategy invokes, exactly once per test case.
///
/// Strategies only decide when and where `run` is called. The API calls made
/// inside `run` are the only suspension points.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, case: &TestCase) -> ExecutionResult;

    /// Settings from which an isolated worker process rebuilds an equivalent runner.
    /// Runners that cannot cross a process boundary return `None`.
    fn worker_settings(&self) -> Option<ApiSettings> {
        None
    }
}

/// Runs test cases against the management API
pub struct TestRunner {
    client: ApiClient,
    settings: ApiSettings,
}

impl TestRunner {
    pub fn new(settings: ApiSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("invalid API base URL '{}'", settings.base_url))?;
        let client = ApiClient::new(base_url, settings.timeout).context("failed to build HTTP client")?;
        Ok(Self { client, settings })
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn credentials(&self) -> &Credentials {
        &self.settings.credentials
    }

    async fn perform(&self, case: &TestCase) -> Result<(), ClientError> {
        let credentials = case.credentials.as_ref().unwrap_or(&self.settings.credentials);
        let client = &self.client;
        let pool = case.target_virtual_service.as_str();

        match case.operation {
            Operation::Login => client.with_session(credentials, |_| async { Ok(()) }).await,
            Operation::EnablePool => {
                client
                    .with_session(credentials, |session| async move {
                        client.set_pool_verified(&session, pool, PoolState::Enabled).await
                    })
                    .await
            }
            Operation::DisablePool => {
                client
                    .with_session(credentials, |session| async move {
                        client.set_pool_verified(&session, pool, PoolState::Disabled).await
                    })
                    .await
            }
            // The logout under test is itself the release of the session
            Operation::Logout => {
                let session = client.login(credentials).await?;
                client.logout(&session).await
            }
        }
    }
}

#[async_trait]
impl Runner for TestRunner {
    async fn run(&self, case: &TestCase) -> ExecutionResult {
        debug!(test_id = %case.id, operation = %case.operation, pool = %case.target_virtual_service, "Running test case");

        let start = Instant::now();
        let observed = self.perform(case).await;
        let result = evaluator::evaluate(case, observed, start.elapsed());

        debug!(
            test_id = %case.id,
            status = ?result.status,
            execution_ms = result.duration.as_millis() as u64,
            "Test case finished"
        );
        result
    }

    fn worker_settings(&self) -> Option<ApiSettings> {
        Some(self.settings.clone())
    }
}
