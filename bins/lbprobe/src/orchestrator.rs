//! Orchestrator - Run Lifecycle
//!
//! **Responsibility:**
//! Validate configuration, pre-flight the API, pick a strategy, execute and
//! decide the exit status.
//!
//! **Lifecycle:**
//! `Idle → Running → Completed`, or `Idle → Running → FatalAborted` when the
//! configuration or the pre-flight check fails before any test starts. Once
//! execution starts, failures are per test and never abort the run.
//!
//! This module is the glue layer - it knows nothing about:
//! - How a test is performed (runner's job)
//! - How outcomes are judged (evaluator's job)
//! - How tests are scheduled (engine's job)

use crate::client::ClientError;
use crate::engine::{local_runtime, Strategy};
use crate::runner::TestRunner;
use crate::supervisor::WorkerCommand;
use lbprobe_common::config::{Config, ConfigError, ParallelismMethod};
use lbprobe_common::types::RunReport;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    FatalAborted,
}

/// Reasons a run ends before any test case starts
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("pre-flight check failed: {0}")]
    Preflight(ClientError),

    #[error("setup failed: {0}")]
    Setup(String),
}

pub struct Orchestrator {
    config: Config,
    method: ParallelismMethod,
    worker_command: Option<WorkerCommand>,
    state: RunState,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let method = config.parallelism.method;
        Self {
            config,
            method,
            worker_command: None,
            state: RunState::Idle,
        }
    }

    /// Override the configured parallelism method
    pub fn with_method(mut self, method: ParallelismMethod) -> Self {
        self.method = method;
        self
    }

    /// Worker processes for `multiprocessing`; defaults to this executable
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn method(&self) -> ParallelismMethod {
        self.method
    }

    #[instrument(skip(self), fields(method = %self.method))]
    pub fn run(&mut self) -> Result<RunReport, FatalError> {
        self.state = RunState::Running;
        match self.prepare_and_execute() {
            Ok(report) => {
                self.state = RunState::Completed;
                Ok(report)
            }
            Err(e) => {
                self.state = RunState::FatalAborted;
                error!(error = %e, "Run aborted before execution");
                Err(e)
            }
        }
    }

    fn prepare_and_execute(&self) -> Result<RunReport, FatalError> {
        self.config.validate()?;
        let cases = self.config.test_cases();

        let runner = TestRunner::new(self.config.api_settings())
            .map_err(|e| FatalError::Setup(format!("{:#}", e)))?;
        let strategy = self.strategy()?;

        self.preflight(&runner)?;
        info!(strategy = %strategy.label(), test_count = cases.len(), "Pre-flight passed");

        Ok(strategy.execute(&cases, &runner))
    }

    fn strategy(&self) -> Result<Strategy, FatalError> {
        let workers = self.config.parallelism.thread_count;
        let strategy = match self.method {
            ParallelismMethod::Sequential => Strategy::Sequential,
            ParallelismMethod::Threading => Strategy::ThreadPool { workers },
            ParallelismMethod::Multiprocessing => {
                let command = match &self.worker_command {
                    Some(command) => command.clone(),
                    None => WorkerCommand::current_exe()
                        .map_err(|e| FatalError::Setup(format!("cannot locate worker executable: {}", e)))?,
                };
                Strategy::ProcessPool { workers, command }
            }
            ParallelismMethod::Cooperative => Strategy::Cooperative {
                concurrency: workers,
                run_timeout: self.config.run_timeout(),
            },
        };
        Ok(strategy)
    }

    /// Make sure the account exists, then prove the credentials with a login/logout pair
    fn preflight(&self, runner: &TestRunner) -> Result<(), FatalError> {
        let runtime =
            local_runtime().map_err(|e| FatalError::Setup(format!("failed to start runtime: {}", e)))?;
        let client = runner.client();
        let credentials = runner.credentials();

        runtime.block_on(async {
            if let Err(e) = client.register(credentials).await {
                warn!(username = %credentials.username, error = %e, "Registration failed, continuing");
            }
            let session = client.login(credentials).await.map_err(FatalError::Preflight)?;
            client.logout(&session).await.map_err(FatalError::Preflight)
        })
    }
}

/// 0 all succeeded, 1 some test did not succeed, 2 the run never started
pub fn exit_code(outcome: &Result<RunReport, FatalError>) -> u8 {
    match outcome {
        Ok(report) if report.is_success() => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}

/// Human-readable run summary for stdout
pub fn render_summary(report: &RunReport) -> String {
    let counts = report.counts();
    let mut lines = vec![
        format!("Run {} ({})", report.run_id(), report.strategy()),
        format!(
            "  total: {}  succeeded: {}  failed: {}  errored: {}  cancelled: {}",
            counts.total(),
            counts.succeeded,
            counts.failed,
            counts.errored,
            counts.cancelled
        ),
        format!("  elapsed: {:.3}s", report.elapsed().as_secs_f64()),
    ];

    for result in report.non_succeeded() {
        lines.push(format!(
            "  {} {}: {}",
            result.status,
            result.test_id,
            result.detail.as_deref().unwrap_or("-")
        ));
    }
    lines.join("\n")
}
