//! Process worker frame semantics - defines only the framing, not the runtime logic.
//! Keeps the supervisor and its worker processes from drifting apart.
//!
//! One frame is one JSON document terminated by `\n`, on the worker's stdin
//! (supervisor → worker) or stdout (worker → supervisor). Workers log to stderr only.

use crate::config::ApiSettings;
use crate::types::{ExecutionResult, TestCase};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hidden CLI subcommand that turns the binary into a process worker
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Supervisor → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToWorker {
    /// First frame on every worker; the worker builds its own runner from it
    Bootstrap { settings: ApiSettings },
    /// Execute one test case; `index` is its submission position
    Job { index: usize, case: TestCase },
    /// No more work; exit cleanly
    Shutdown,
}

/// Worker → supervisor, two per `Job`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromWorker {
    /// The job was received and is about to run
    Started { index: usize },
    /// The job ran to completion
    Finished { index: usize, result: ExecutionResult },
}

impl FromWorker {
    pub fn index(&self) -> usize {
        match self {
            FromWorker::Started { index } | FromWorker::Finished { index, .. } => *index,
        }
    }
}

/// Encode a frame, including the trailing newline
pub fn encode_frame<T: Serialize>(frame: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Decode one frame; surrounding whitespace (the newline) is ignored
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim())
}
