// Run configuration document (YAML)

use crate::types::{Credentials, ExpectedOutcome, Operation, TestCase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TARGET_VIRTUAL_SERVICE: &str = "backend-vs-t1r_1000-1";
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;
pub const DEFAULT_THREAD_COUNT: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelismMethod {
    Sequential,
    #[default]
    Threading,
    Multiprocessing,
    #[serde(alias = "asyncio")]
    Cooperative,
}

impl fmt::Display for ParallelismMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelismMethod::Sequential => write!(f, "sequential"),
            ParallelismMethod::Threading => write!(f, "threading"),
            ParallelismMethod::Multiprocessing => write!(f, "multiprocessing"),
            ParallelismMethod::Cooperative => write!(f, "cooperative"),
        }
    }
}

impl FromStr for ParallelismMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ParallelismMethod::Sequential),
            "threading" => Ok(ParallelismMethod::Threading),
            "multiprocessing" => Ok(ParallelismMethod::Multiprocessing),
            "cooperative" | "asyncio" => Ok(ParallelismMethod::Cooperative),
            other => Err(format!(
                "unknown parallelism method '{}' (expected sequential, threading, multiprocessing or cooperative)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default)]
    pub base_url: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelismSection {
    #[serde(default)]
    pub method: ParallelismMethod,
    #[serde(default = "default_thread_count", alias = "max_workers")]
    pub thread_count: usize,
    /// Run-level timeout in seconds, honored by the cooperative method only
    #[serde(default)]
    pub run_timeout: Option<f64>,
}

impl Default for ParallelismSection {
    fn default() -> Self {
        Self {
            method: ParallelismMethod::default(),
            thread_count: DEFAULT_THREAD_COUNT,
            run_timeout: None,
        }
    }
}

/// Test case as written in the document; missing fields are resolved by `Config::test_cases`
#[derive(Debug, Clone, Deserialize)]
pub struct TestCaseEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub target_virtual_service: Option<String>,
    #[serde(default)]
    pub expected_outcome: ExpectedOutcome,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_thread_count() -> usize {
    DEFAULT_THREAD_COUNT
}

fn default_target() -> String {
    DEFAULT_TARGET_VIRTUAL_SERVICE.to_string()
}

/// Everything a runner needs to rebuild itself, in this process or in a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default = "default_target")]
    pub target_virtual_service: String,
    #[serde(default)]
    pub parallelism: ParallelismSection,
    #[serde(default)]
    pub test_cases: Vec<TestCaseEntry>,
}

impl Config {
    /// Load and parse a configuration file. Validation is a separate step.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.api.timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.parallelism
            .run_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.api.base_url.trim_end_matches('/').to_string(),
            timeout: self.api_timeout(),
            credentials: self.credentials.clone(),
        }
    }

    /// Resolve document entries into the ordered test case registry
    pub fn test_cases(&self) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let id = entry
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("t-{}", idx + 1));
                TestCase {
                    name: entry.name.clone().unwrap_or_else(|| id.clone()),
                    id,
                    operation: entry.operation,
                    target_virtual_service: entry
                        .target_virtual_service
                        .clone()
                        .unwrap_or_else(|| self.target_virtual_service.clone()),
                    expected_outcome: entry.expected_outcome,
                    credentials: entry.credentials.clone(),
                }
            })
            .collect()
    }

    /// Reject documents that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Invalid("api.base_url is required".to_string()));
        }
        let parsed = Url::parse(base_url).map_err(|e| {
            ConfigError::Invalid(format!("api.base_url '{}' is not a valid URL: {}", base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "api.base_url must be an absolute http(s) URL, got '{}'",
                base_url
            )));
        }

        match Duration::try_from_secs_f64(self.api.timeout) {
            Ok(timeout) if !timeout.is_zero() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "api.timeout must be a positive number of seconds, got {}",
                    self.api.timeout
                )))
            }
        }

        if let Some(secs) = self.parallelism.run_timeout {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "parallelism.run_timeout must be a non-negative number of seconds, got {}",
                    secs
                )));
            }
        }

        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(ConfigError::Invalid(
                "credentials.username and credentials.password are required".to_string(),
            ));
        }

        let cases = self.test_cases();
        if cases.is_empty() {
            return Err(ConfigError::Invalid("no test cases configured".to_string()));
        }

        let mut seen = HashSet::new();
        for case in &cases {
            if case.id.trim().is_empty() {
                return Err(ConfigError::Invalid("test case id must not be empty".to_string()));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate test case id '{}'", case.id)));
            }
            let needs_pool = matches!(case.operation, Operation::EnablePool | Operation::DisablePool);
            if needs_pool && case.target_virtual_service.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "test case '{}' needs a target_virtual_service",
                    case.id
                )));
            }
        }

        Ok(())
    }
}
