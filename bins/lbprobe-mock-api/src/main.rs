use lbprobe_mock::{router, MockBehavior, MockState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_POOL: &str = "backend-vs-t1r_1000-1";

/// `user:password,user:password`
fn parse_users(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| pair.trim().split_once(':'))
        .filter(|(user, _)| !user.is_empty())
        .map(|(user, password)| (user.to_string(), password.to_string()))
        .collect()
}

fn parse_pools(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn behavior_from_env() -> MockBehavior {
    let mut behavior = MockBehavior::new();

    if let Ok(users) = std::env::var("MOCK_USERS") {
        for (user, password) in parse_users(&users) {
            behavior = behavior.with_user(&user, &password);
        }
    }

    let pools = std::env::var("MOCK_POOLS").unwrap_or_else(|_| DEFAULT_POOL.to_string());
    for pool in parse_pools(&pools) {
        behavior = behavior.with_pool(&pool);
    }

    if let Ok(raw) = std::env::var("MOCK_LATENCY_MS") {
        match raw.parse::<u64>() {
            Ok(ms) => behavior = behavior.with_latency(Duration::from_millis(ms)),
            Err(_) => warn!(value = %raw, "Ignoring invalid MOCK_LATENCY_MS"),
        }
    }

    behavior
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Mock load-balancer API booting...");

    let behavior = behavior_from_env();
    info!(
        users = behavior.users.len(),
        pools = ?behavior.pools.keys().collect::<Vec<_>>(),
        latency_ms = behavior.latency.as_millis() as u64,
        "Mock behavior loaded"
    );

    let state = Arc::new(MockState::new(behavior));
    let app = router(state);

    let addr = std::env::var("MOCK_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_users() {
        let users = parse_users("admin:secret, ops:p:w ,broken,:nouser");
        assert_eq!(
            users,
            vec![
                ("admin".to_string(), "secret".to_string()),
                ("ops".to_string(), "p:w".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_pools() {
        assert_eq!(parse_pools("vs-a, vs-b,,"), vec!["vs-a".to_string(), "vs-b".to_string()]);
        assert!(parse_pools("").is_empty());
    }
}
