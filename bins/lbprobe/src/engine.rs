//! Execution Engine - Strategies
//!
//! **Core Responsibility:**
//! Run an ordered list of test cases through a `Runner` and produce a `RunReport`.
//!
//! **Critical Architectural Boundary:**
//! - Engine knows WHEN and WHERE a test runs (thread, process, task)
//! - Engine does NOT know what a test does or how it is judged
//! - Every strategy invokes the runner exactly once per test case, or reports it CANCELLED
//! - Results are always returned in submission order, whatever the completion order
//!
//! A panicking runner is contained per test case and reported as ERRORED.

use crate::runner::Runner;
use crate::supervisor::{self, WorkerCommand};
use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use lbprobe_common::types::{ExecutionResult, RunReport, TestCase};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub enum Strategy {
    /// One test at a time on the calling thread
    Sequential,
    /// Up to `workers` OS threads pulling from a shared queue; `0` means sequential
    ThreadPool { workers: usize },
    /// Up to `workers` isolated child processes; `0` means one
    ProcessPool { workers: usize, command: WorkerCommand },
    /// One thread, at most `concurrency` tests in flight; tests not admitted
    /// before `run_timeout` are CANCELLED
    Cooperative {
        concurrency: usize,
        run_timeout: Option<Duration>,
    },
}

impl Strategy {
    pub fn label(&self) -> String {
        match self {
            Strategy::Sequential => "sequential".to_string(),
            Strategy::ThreadPool { workers } => format!("thread_pool({})", workers),
            Strategy::ProcessPool { workers, .. } => format!("process_pool({})", workers),
            Strategy::Cooperative { concurrency, .. } => format!("cooperative({})", concurrency),
        }
    }

    /// Run every case and aggregate the report.
    ///
    /// Must not be called from inside an async runtime: the strategies own
    /// their runtimes.
    #[instrument(skip_all, fields(strategy = %self.label(), test_count = cases.len()))]
    pub fn execute<R: Runner + ?Sized>(&self, cases: &[TestCase], runner: &R) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting execution");

        let results = match self {
            Strategy::Sequential => run_sequential(cases, runner),
            Strategy::ThreadPool { workers } => run_thread_pool(cases, runner, *workers),
            Strategy::ProcessPool { workers, command } => {
                supervisor::run_process_pool(cases, runner, *workers, command)
            }
            Strategy::Cooperative {
                concurrency,
                run_timeout,
            } => run_cooperative(cases, runner, *concurrency, *run_timeout),
        };

        let elapsed = start.elapsed();
        let report = RunReport::new(self.label(), results, started_at, Utc::now(), elapsed);
        let counts = report.counts();
        info!(
            succeeded = counts.succeeded,
            failed = counts.failed,
            errored = counts.errored,
            cancelled = counts.cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "Execution finished"
        );
        report
    }
}

/// A single-threaded runtime owned by the calling thread
pub(crate) fn local_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

/// Invoke the runner, turning a panic into an ERRORED result for this case only
pub(crate) async fn guarded<R: Runner + ?Sized>(case: &TestCase, runner: &R) -> ExecutionResult {
    let start = Instant::now();
    match AssertUnwindSafe(runner.run(case)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(test_id = %case.id, panic = %message, "Runner panicked");
            ExecutionResult::errored(&case.id, start.elapsed(), format!("worker fault: panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fill every slot no worker reported on; keeps the result list complete
pub(crate) fn collect_slots(cases: &[TestCase], slots: Vec<Option<ExecutionResult>>) -> Vec<ExecutionResult> {
    cases
        .iter()
        .zip(slots)
        .map(|(case, slot)| {
            slot.unwrap_or_else(|| {
                ExecutionResult::errored(
                    &case.id,
                    Duration::ZERO,
                    "worker fault: worker exited without reporting a result",
                )
            })
        })
        .collect()
}

fn runtime_unavailable(cases: &[TestCase], error: &std::io::Error) -> Vec<ExecutionResult> {
    warn!(error = %error, "Failed to start async runtime");
    cases
        .iter()
        .map(|case| {
            ExecutionResult::errored(
                &case.id,
                Duration::ZERO,
                format!("worker fault: failed to start runtime: {}", error),
            )
        })
        .collect()
}

fn run_sequential<R: Runner + ?Sized>(cases: &[TestCase], runner: &R) -> Vec<ExecutionResult> {
    let runtime = match local_runtime() {
        Ok(runtime) => runtime,
        Err(e) => return runtime_unavailable(cases, &e),
    };
    cases.iter().map(|case| runtime.block_on(guarded(case, runner))).collect()
}

fn run_thread_pool<R: Runner + ?Sized>(cases: &[TestCase], runner: &R, workers: usize) -> Vec<ExecutionResult> {
    if workers == 0 {
        return run_sequential(cases, runner);
    }
    let effective = workers.min(cases.len());
    if effective == 0 {
        return Vec::new();
    }

    let queue = Mutex::new((0..cases.len()).collect::<VecDeque<usize>>());
    let slots = Mutex::new(vec![None; cases.len()]);

    std::thread::scope(|scope| {
        let queue = &queue;
        let slots = &slots;
        for worker_id in 0..effective {
            let spawned = std::thread::Builder::new()
                .name(format!("lbprobe-worker-{}", worker_id))
                .spawn_scoped(scope, move || drain_queue(worker_id, cases, runner, queue, slots));
            if let Err(e) = spawned {
                warn!(worker_id, error = %e, "Failed to spawn worker thread");
            }
        }
    });

    collect_slots(cases, slots.into_inner())
}

fn drain_queue<R: Runner + ?Sized>(
    worker_id: usize,
    cases: &[TestCase],
    runner: &R,
    queue: &Mutex<VecDeque<usize>>,
    slots: &Mutex<Vec<Option<ExecutionResult>>>,
) {
    // Remaining workers keep draining the queue
    let runtime = match local_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(worker_id, error = %e, "Worker could not start its runtime");
            return;
        }
    };

    loop {
        let Some(index) = queue.lock().pop_front() else {
            break;
        };
        let result = runtime.block_on(guarded(&cases[index], runner));
        slots.lock()[index] = Some(result);
    }
}

fn run_cooperative<R: Runner + ?Sized>(
    cases: &[TestCase],
    runner: &R,
    concurrency: usize,
    run_timeout: Option<Duration>,
) -> Vec<ExecutionResult> {
    let runtime = match local_runtime() {
        Ok(runtime) => runtime,
        Err(e) => return runtime_unavailable(cases, &e),
    };

    runtime.block_on(async {
        let gate = Semaphore::new(concurrency.max(1));
        let deadline = run_timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        join_all(cases.iter().map(|case| admit_and_run(case, runner, &gate, deadline))).await
    })
}

/// Wait for a slot under the gate, unless the run deadline passes first.
///
/// The semaphore queues waiters first come first served, so admission
/// follows submission order and the cancelled tests form a suffix.
async fn admit_and_run<R: Runner + ?Sized>(
    case: &TestCase,
    runner: &R,
    gate: &Semaphore,
    deadline: Option<tokio::time::Instant>,
) -> ExecutionResult {
    let permit = match deadline {
        Some(deadline) => tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => None,
            permit = gate.acquire() => permit.ok(),
        },
        None => gate.acquire().await.ok(),
    };

    match permit {
        Some(_permit) => guarded(case, runner).await,
        None => ExecutionResult::cancelled(&case.id, "run timeout elapsed before the test started"),
    }
}
