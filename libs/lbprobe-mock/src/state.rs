// Scripted behavior and live state of one mock API instance

use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// How an instance answers. Built once, before the server starts.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub users: HashMap<String, String>,
    pub pools: HashMap<String, PoolScript>,
    /// Fixed delay added to every request
    pub latency: Duration,
    /// Upper bound of a random extra delay per request
    pub jitter: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolScript {
    /// Status returned by enable/disable instead of 200
    pub forced_status: Option<u16>,
    /// Acknowledge enable/disable with 200 but keep the current state
    pub ignores_updates: bool,
}

impl MockBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), password.to_string());
        self
    }

    pub fn with_pool(mut self, name: &str) -> Self {
        self.pools.insert(name.to_string(), PoolScript::default());
        self
    }

    pub fn with_failing_pool(mut self, name: &str, status: u16) -> Self {
        self.pools.insert(
            name.to_string(),
            PoolScript {
                forced_status: Some(status),
                ignores_updates: false,
            },
        );
        self
    }

    /// A pool that answers 200 to updates without applying them
    pub fn with_stuck_pool(mut self, name: &str) -> Self {
        self.pools.insert(
            name.to_string(),
            PoolScript {
                forced_status: None,
                ignores_updates: true,
            },
        );
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

pub(crate) enum PoolUpdate {
    Applied,
    Unknown,
    Forced(u16),
}

/// Live state of one instance: accounts, sessions, pool flags, call counters
pub struct MockState {
    behavior: MockBehavior,
    users: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashSet<String>>,
    pools: Mutex<HashMap<String, bool>>,
    calls: Mutex<HashMap<&'static str, u64>>,
}

impl MockState {
    pub fn new(behavior: MockBehavior) -> Self {
        let users = behavior.users.clone();
        let pools = behavior.pools.keys().map(|name| (name.clone(), true)).collect();
        Self {
            behavior,
            users: Mutex::new(users),
            sessions: Mutex::new(HashSet::new()),
            pools: Mutex::new(pools),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests seen on a route (`login`, `logout`, `enable`, ...)
    pub fn call_count(&self, route: &str) -> u64 {
        self.calls.lock().get(route).copied().unwrap_or(0)
    }

    /// Sessions issued by login and not yet logged out
    pub fn live_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn pool_enabled(&self, name: &str) -> Option<bool> {
        self.pools.lock().get(name).copied()
    }

    pub(crate) fn record(&self, route: &'static str) {
        *self.calls.lock().entry(route).or_insert(0) += 1;
    }

    pub(crate) async fn delay(&self) {
        let mut wait = self.behavior.latency;
        let jitter_ms = self.behavior.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            wait += Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        }
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns false when the user already exists
    pub(crate) fn register(&self, username: &str, password: &str) -> bool {
        let mut users = self.users.lock();
        if users.contains_key(username) {
            return false;
        }
        users.insert(username.to_string(), password.to_string());
        true
    }

    pub(crate) fn login(&self, username: &str, password: &str) -> Option<String> {
        let valid = self
            .users
            .lock()
            .get(username)
            .is_some_and(|expected| expected == password);
        if !valid {
            return None;
        }
        let token = Uuid::new_v4().to_string();
        self.sessions.lock().insert(token.clone());
        Some(token)
    }

    pub(crate) fn logout(&self, token: &str) {
        self.sessions.lock().remove(token);
    }

    pub(crate) fn is_live(&self, token: &str) -> bool {
        self.sessions.lock().contains(token)
    }

    pub(crate) fn set_pool(&self, name: &str, enabled: bool) -> PoolUpdate {
        let script = match self.behavior.pools.get(name) {
            Some(script) => *script,
            None => return PoolUpdate::Unknown,
        };
        if let Some(status) = script.forced_status {
            return PoolUpdate::Forced(status);
        }
        if !script.ignores_updates {
            self.pools.lock().insert(name.to_string(), enabled);
        }
        PoolUpdate::Applied
    }
}
