//! Process pool supervisor
//!
//! **Responsibility:**
//! Drive up to `n` isolated worker processes from a shared queue, one
//! supervisor thread per worker, and map every outcome back to its
//! submission slot.
//!
//! **Crash isolation:**
//! Every job is acknowledged with a `Started` frame before it runs.
//! - An idle worker found dead is replaced before it is handed a job.
//! - A worker that never acknowledges a job has not run it: the job goes to
//!   one relaunched worker before the test is given up as ERRORED.
//! - A worker that dies or garbles its channel after acknowledging turns
//!   that test into ERRORED with the exit status in the detail, and the next
//!   test gets a replacement.

use crate::engine::collect_slots;
use crate::runner::Runner;
use lbprobe_common::config::ApiSettings;
use lbprobe_common::types::{ExecutionResult, TestCase};
use lbprobe_common::wire::{decode_frame, encode_frame, FromWorker, ToWorker, WORKER_SUBCOMMAND};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How to start a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// This very binary, started in worker mode
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_SUBCOMMAND))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

#[derive(Debug, Error)]
enum WorkerError {
    #[error("worker I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("undecodable frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("worker closed its result channel")]
    Closed,

    #[error("worker answered for test #{got} while running test #{expected}")]
    OutOfOrder { expected: usize, got: usize },

    #[error("worker sent {got} while test #{index} was expecting {wanted}")]
    Unexpected {
        index: usize,
        wanted: &'static str,
        got: &'static str,
    },
}

fn frame_kind(frame: &FromWorker) -> &'static str {
    match frame {
        FromWorker::Started { .. } => "started",
        FromWorker::Finished { .. } => "finished",
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn launch(command: &WorkerCommand, settings: &ApiSettings) -> Result<Self, WorkerError> {
        let mut child = command
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WorkerError::Closed);
        };

        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        if let Err(e) = process.send(&ToWorker::Bootstrap {
            settings: settings.clone(),
        }) {
            process.terminate();
            return Err(e);
        }
        Ok(process)
    }

    fn id(&self) -> u32 {
        self.child.id()
    }

    fn send(&mut self, frame: &ToWorker) -> Result<(), WorkerError> {
        let line = encode_frame(frame)?;
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Whether the process is still running; a failed poll counts as gone
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn receive(&mut self, index: usize) -> Result<FromWorker, WorkerError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(WorkerError::Closed);
        }

        let frame: FromWorker = decode_frame(&line)?;
        if frame.index() != index {
            return Err(WorkerError::OutOfOrder {
                expected: index,
                got: frame.index(),
            });
        }
        Ok(frame)
    }

    /// Hand over a job; Ok means the worker acknowledged it and is running it
    fn start(&mut self, index: usize, case: &TestCase) -> Result<(), WorkerError> {
        self.send(&ToWorker::Job {
            index,
            case: case.clone(),
        })?;

        match self.receive(index)? {
            FromWorker::Started { .. } => Ok(()),
            other => Err(WorkerError::Unexpected {
                index,
                wanted: "started",
                got: frame_kind(&other),
            }),
        }
    }

    fn finish(&mut self, index: usize) -> Result<ExecutionResult, WorkerError> {
        match self.receive(index)? {
            FromWorker::Finished { result, .. } => Ok(result),
            other => Err(WorkerError::Unexpected {
                index,
                wanted: "finished",
                got: frame_kind(&other),
            }),
        }
    }

    /// Reap a worker that can no longer be trusted; describes how it ended
    fn terminate(mut self) -> String {
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => format!("worker exited with {}", status),
            Err(e) => format!("worker exit status unknown: {}", e),
        }
    }

    fn shutdown(mut self) {
        let pid = self.id();
        if let Err(e) = self.send(&ToWorker::Shutdown) {
            debug!(pid, error = %e, "Worker gone before shutdown");
        }
        drop(self.stdin);

        match self.child.wait() {
            Ok(status) if status.success() => debug!(pid, "Worker process exited"),
            Ok(status) => warn!(pid, %status, "Worker process exited abnormally"),
            Err(e) => warn!(pid, error = %e, "Failed to reap worker process"),
        }
    }
}

pub(crate) fn run_process_pool<R: Runner + ?Sized>(
    cases: &[TestCase],
    runner: &R,
    workers: usize,
    command: &WorkerCommand,
) -> Vec<ExecutionResult> {
    let Some(settings) = runner.worker_settings() else {
        warn!("Runner cannot be rebuilt in a worker process");
        return cases
            .iter()
            .map(|case| {
                ExecutionResult::errored(
                    &case.id,
                    Duration::ZERO,
                    "worker fault: runner cannot be rebuilt in a worker process",
                )
            })
            .collect();
    };

    let effective = workers.max(1).min(cases.len());
    if effective == 0 {
        return Vec::new();
    }

    let queue = Mutex::new((0..cases.len()).collect::<VecDeque<usize>>());
    let slots = Mutex::new(vec![None; cases.len()]);

    std::thread::scope(|scope| {
        let queue = &queue;
        let slots = &slots;
        let settings = &settings;
        for worker_id in 0..effective {
            let spawned = std::thread::Builder::new()
                .name(format!("lbprobe-supervisor-{}", worker_id))
                .spawn_scoped(scope, move || supervise(worker_id, cases, settings, command, queue, slots));
            if let Err(e) = spawned {
                warn!(worker_id, error = %e, "Failed to spawn supervisor thread");
            }
        }
    });

    collect_slots(cases, slots.into_inner())
}

fn supervise(
    worker_id: usize,
    cases: &[TestCase],
    settings: &ApiSettings,
    command: &WorkerCommand,
    queue: &Mutex<VecDeque<usize>>,
    slots: &Mutex<Vec<Option<ExecutionResult>>>,
) {
    let mut worker: Option<WorkerProcess> = None;

    loop {
        let Some(index) = queue.lock().pop_front() else {
            break;
        };
        let case = &cases[index];

        let start = Instant::now();
        let result = match dispatch(worker_id, &mut worker, index, case, settings, command) {
            Ok(result) => result,
            Err(detail) => ExecutionResult::errored(&case.id, start.elapsed(), detail),
        };
        slots.lock()[index] = Some(result);
    }

    if let Some(process) = worker {
        process.shutdown();
    }
}

/// Run one job on this thread's worker, keeping the worker only if it answered in full.
/// Errors carry the ERRORED detail.
fn dispatch(
    worker_id: usize,
    worker: &mut Option<WorkerProcess>,
    index: usize,
    case: &TestCase,
    settings: &ApiSettings,
    command: &WorkerCommand,
) -> Result<ExecutionResult, String> {
    let mut process = acquire(worker_id, worker.take(), settings, command)?;

    if let Err(e) = process.start(index, case) {
        let exit = process.terminate();
        warn!(worker_id, test_id = %case.id, error = %e, exit = %exit, "Worker did not take the job, relaunching");

        process = launch(worker_id, settings, command)?;
        if let Err(e) = process.start(index, case) {
            let exit = process.terminate();
            warn!(worker_id, test_id = %case.id, error = %e, exit = %exit, "Relaunched worker did not take the job");
            return Err(format!("worker fault: {} ({})", e, exit));
        }
    }

    match process.finish(index) {
        Ok(result) => {
            *worker = Some(process);
            Ok(result)
        }
        Err(e) => {
            let exit = process.terminate();
            warn!(worker_id, test_id = %case.id, error = %e, exit = %exit, "Worker process lost");
            Err(format!("worker fault: {} ({})", e, exit))
        }
    }
}

/// Reuse the idle worker if it is still running, otherwise start a new one
fn acquire(
    worker_id: usize,
    idle: Option<WorkerProcess>,
    settings: &ApiSettings,
    command: &WorkerCommand,
) -> Result<WorkerProcess, String> {
    if let Some(mut process) = idle {
        if process.is_alive() {
            return Ok(process);
        }
        let pid = process.id();
        let exit = process.terminate();
        debug!(worker_id, pid, exit = %exit, "Idle worker process is gone, replacing it");
    }
    launch(worker_id, settings, command)
}

fn launch(worker_id: usize, settings: &ApiSettings, command: &WorkerCommand) -> Result<WorkerProcess, String> {
    match WorkerProcess::launch(command, settings) {
        Ok(process) => {
            debug!(worker_id, pid = process.id(), "Worker process started");
            Ok(process)
        }
        Err(e) => {
            warn!(worker_id, error = %e, "Failed to launch worker process");
            Err(format!("worker fault: failed to launch worker: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_builder() {
        let command = WorkerCommand::new("/usr/bin/lbprobe").arg("worker").arg("--fault-on").arg("t-4");
        assert_eq!(command.program, PathBuf::from("/usr/bin/lbprobe"));
        assert_eq!(command.args, vec!["worker", "--fault-on", "t-4"]);
    }

    #[test]
    fn test_current_exe_runs_worker_subcommand() {
        let command = WorkerCommand::current_exe().unwrap();
        assert_eq!(command.args, vec![WORKER_SUBCOMMAND.to_string()]);
    }

    #[test]
    fn test_missing_worker_binary_errors_every_case() {
        use crate::runner::TestRunner;
        use lbprobe_common::types::{Credentials, ExpectedOutcome, Operation, TestStatus};

        let runner = TestRunner::new(ApiSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(1),
            credentials: Credentials::new("admin", "secret"),
        })
        .unwrap();
        let cases: Vec<TestCase> = (1..=3)
            .map(|n| TestCase {
                id: format!("t-{}", n),
                name: format!("case {}", n),
                operation: Operation::Login,
                target_virtual_service: "vs-web".to_string(),
                expected_outcome: ExpectedOutcome::Success,
                credentials: None,
            })
            .collect();

        let command = WorkerCommand::new("/nonexistent/lbprobe-worker");
        let results = run_process_pool(&cases, &runner, 2, &command);

        assert_eq!(results.len(), 3);
        for (case, result) in cases.iter().zip(&results) {
            assert_eq!(result.test_id, case.id);
            assert_eq!(result.status, TestStatus::Errored);
            assert!(result.detail.as_deref().unwrap().starts_with("worker fault: failed to launch worker"));
        }
    }

    fn login_cases(count: usize) -> Vec<TestCase> {
        use lbprobe_common::types::{ExpectedOutcome, Operation};

        (1..=count)
            .map(|n| TestCase {
                id: format!("t-{}", n),
                name: format!("case {}", n),
                operation: Operation::Login,
                target_virtual_service: "vs-web".to_string(),
                expected_outcome: ExpectedOutcome::Success,
                credentials: None,
            })
            .collect()
    }

    /// Only the settings matter: jobs run inside the scripted workers
    fn unused_runner() -> crate::runner::TestRunner {
        crate::runner::TestRunner::new(ApiSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(1),
            credentials: lbprobe_common::types::Credentials::new("admin", "secret"),
        })
        .unwrap()
    }

    /// A shell worker that answers the first job it gets with SUCCEEDED, then exits
    #[cfg(unix)]
    const ONE_SHOT_WORKER: &str = r#"
read -r bootstrap
read -r job
index=$(printf '%s\n' "$job" | sed 's/.*"index":\([0-9]*\).*/\1/')
id=$(printf '%s\n' "$job" | sed 's/.*"id":"\([^"]*\)".*/\1/')
printf '{"type":"started","index":%s}\n' "$index"
printf '{"type":"finished","index":%s,"result":{"test_id":"%s","status":"SUCCEEDED","duration":{"secs":0,"nanos":0},"detail":null}}\n' "$index" "$id"
"#;

    #[cfg(unix)]
    #[test]
    fn test_worker_gone_while_idle_is_replaced() {
        use lbprobe_common::types::TestStatus;

        let cases = login_cases(3);
        let command = WorkerCommand::new("sh").arg("-c").arg(ONE_SHOT_WORKER);

        let results = run_process_pool(&cases, &unused_runner(), 1, &command);

        assert_eq!(results.len(), 3);
        for (case, result) in cases.iter().zip(&results) {
            assert_eq!(result.test_id, case.id);
            assert_eq!(result.status, TestStatus::Succeeded, "{:?}", result.detail);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_that_never_takes_the_job_errors_it() {
        use lbprobe_common::types::TestStatus;

        let cases = login_cases(2);
        let command = WorkerCommand::new("sh")
            .arg("-c")
            .arg("read -r bootstrap; read -r job; exit 3");

        let results = run_process_pool(&cases, &unused_runner(), 1, &command);

        for (case, result) in cases.iter().zip(&results) {
            assert_eq!(result.test_id, case.id);
            assert_eq!(result.status, TestStatus::Errored);
            let detail = result.detail.as_deref().unwrap();
            assert!(detail.starts_with("worker fault"), "{}", detail);
            assert!(detail.contains("exit status: 3"), "{}", detail);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_acknowledged_job_is_not_retried() {
        use lbprobe_common::types::TestStatus;

        // Acknowledges the job, then dies before finishing it
        let script = r#"
read -r bootstrap
read -r job
index=$(printf '%s\n' "$job" | sed 's/.*"index":\([0-9]*\).*/\1/')
printf '{"type":"started","index":%s}\n' "$index"
exit 4
"#;
        let cases = login_cases(1);
        let command = WorkerCommand::new("sh").arg("-c").arg(script);

        let results = run_process_pool(&cases, &unused_runner(), 1, &command);

        assert_eq!(results[0].status, TestStatus::Errored);
        let detail = results[0].detail.as_deref().unwrap();
        assert!(detail.contains("worker closed its result channel"), "{}", detail);
        assert!(detail.contains("exit status: 4"), "{}", detail);
    }
}
