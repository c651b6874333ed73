//! Process worker
//!
//! The child end of the process pool: reads frames from stdin, acknowledges
//! each job before running it on its own runner, then writes its result frame
//! to stdout. Logs go to stderr so stdout carries nothing but frames.

use crate::engine::{guarded, local_runtime};
use crate::runner::TestRunner;
use anyhow::{Context, Result};
use lbprobe_common::wire::{decode_frame, encode_frame, FromWorker, ToWorker};
use std::io::{BufRead, StdoutLock, Write};
use tracing::{debug, info, warn};

/// Serve jobs until `Shutdown` or end of input.
///
/// `fault_on` aborts the process right after acknowledging the job with that
/// test id, so the job counts as started but never finishes. Used to exercise
/// crash isolation.
pub fn serve(fault_on: Option<&str>) -> Result<()> {
    let runtime = local_runtime().context("failed to start worker runtime")?;
    let pid = std::process::id();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    let mut runner: Option<TestRunner> = None;

    for line in stdin.lock().lines() {
        let line = line.context("failed to read from supervisor")?;
        if line.trim().is_empty() {
            continue;
        }

        match decode_frame::<ToWorker>(&line).context("malformed frame from supervisor")? {
            ToWorker::Bootstrap { settings } => {
                runner = Some(TestRunner::new(settings)?);
                debug!(pid, "Worker ready");
            }
            ToWorker::Job { index, case } => {
                write_frame(&mut stdout, &FromWorker::Started { index })?;
                if fault_on == Some(case.id.as_str()) {
                    warn!(pid, test_id = %case.id, "Injected fault, aborting");
                    std::process::abort();
                }
                let runner = runner.as_ref().context("job received before bootstrap")?;
                let result = runtime.block_on(guarded(&case, runner));

                write_frame(&mut stdout, &FromWorker::Finished { index, result })?;
            }
            ToWorker::Shutdown => {
                info!(pid, "Worker shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn write_frame(stdout: &mut StdoutLock<'_>, frame: &FromWorker) -> Result<()> {
    let line = encode_frame(frame)?;
    stdout
        .write_all(line.as_bytes())
        .and_then(|_| stdout.flush())
        .with_context(|| format!("failed to write frame for test #{}", frame.index()))
}
