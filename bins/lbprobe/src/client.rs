//! Load-balancer management API client
//!
//! **Responsibility:**
//! Perform login, pool enable/disable and logout, and turn every HTTP-level
//! outcome into a typed result.
//!
//! **Error mapping:**
//! - non-2xx on login → `Auth`
//! - non-2xx elsewhere → `Api(status)`
//! - connection failure or no response within the timeout → `Timeout`
//! - 2xx with an undecodable body → `Malformed`
//! - pool read back in the wrong state after an update → `Mismatch`

use lbprobe_common::types::Credentials;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("login rejected with HTTP {status}")]
    Auth { status: u16 },

    #[error("API returned HTTP {status}")]
    Api { status: u16 },

    #[error("no response in time: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("pool '{pool}' reads back {observed} after the update")]
    Mismatch { pool: String, observed: PoolState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Enabled,
    Disabled,
}

impl PoolState {
    fn from_enabled(enabled: bool) -> Self {
        if enabled {
            PoolState::Enabled
        } else {
            PoolState::Disabled
        }
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Enabled => write!(f, "enabled"),
            PoolState::Disabled => write!(f, "disabled"),
        }
    }
}

impl ClientError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Malformed(err.to_string())
        } else {
            ClientError::Timeout(err.to_string())
        }
    }

    /// The service answered and said no, or acknowledged a change it did not make
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ClientError::Auth { .. } | ClientError::Api { .. } | ClientError::Mismatch { .. }
        )
    }
}

/// An authenticated session; released with `logout`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    session_token: String,
}

#[derive(Deserialize)]
struct PoolResponse {
    enabled: bool,
}

#[derive(Serialize)]
struct LogoutRequest<'a> {
    session_token: &'a str,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> reqwest::Result<Self> {
        // No idle connections are kept: one client is driven from several
        // single-threaded runtimes, and a pooled connection is bound to the
        // runtime that opened it.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn check(status: StatusCode) -> Result<(), ClientError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Api {
                status: status.as_u16(),
            })
        }
    }

    /// Create the account; an existing account (409) counts as success
    pub async fn register(&self, credentials: &Credentials) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["register"]))
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        match response.status() {
            StatusCode::CONFLICT => {
                debug!(username = %credentials.username, "User already exists");
                Ok(())
            }
            status => Self::check(status),
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["login"]))
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Auth {
                status: status.as_u16(),
            });
        }

        let body: LoginResponse = response.json().await.map_err(ClientError::from_transport)?;
        if body.session_token.is_empty() {
            return Err(ClientError::Malformed("empty session_token".to_string()));
        }
        Ok(Session {
            token: body.session_token,
        })
    }

    pub async fn enable_pool(&self, session: &Session, virtual_service: &str) -> Result<(), ClientError> {
        self.update_pool(session, virtual_service, "enable").await
    }

    pub async fn disable_pool(&self, session: &Session, virtual_service: &str) -> Result<(), ClientError> {
        self.update_pool(session, virtual_service, "disable").await
    }

    async fn update_pool(&self, session: &Session, virtual_service: &str, action: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["pools", virtual_service, action]))
            .bearer_auth(session.token())
            .send()
            .await
            .map_err(ClientError::from_transport)?;
        Self::check(response.status())
    }

    /// Read the current state of a pool
    pub async fn pool_state(&self, session: &Session, virtual_service: &str) -> Result<PoolState, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&["pools", virtual_service]))
            .bearer_auth(session.token())
            .send()
            .await
            .map_err(ClientError::from_transport)?;
        Self::check(response.status())?;

        let body: PoolResponse = response.json().await.map_err(ClientError::from_transport)?;
        Ok(PoolState::from_enabled(body.enabled))
    }

    /// Apply an update, then read the pool back to confirm it took effect
    pub async fn set_pool_verified(
        &self,
        session: &Session,
        virtual_service: &str,
        wanted: PoolState,
    ) -> Result<(), ClientError> {
        match wanted {
            PoolState::Enabled => self.enable_pool(session, virtual_service).await?,
            PoolState::Disabled => self.disable_pool(session, virtual_service).await?,
        }

        let observed = self.pool_state(session, virtual_service).await?;
        if observed != wanted {
            return Err(ClientError::Mismatch {
                pool: virtual_service.to_string(),
                observed,
            });
        }
        Ok(())
    }

    pub async fn logout(&self, session: &Session) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&["logout"]))
            .json(&LogoutRequest {
                session_token: session.token(),
            })
            .send()
            .await
            .map_err(ClientError::from_transport)?;
        Self::check(response.status())
    }

    /// Run `f` inside a session that is logged out afterwards on every path.
    ///
    /// A failed logout is logged and does not replace the outcome of `f`.
    pub async fn with_session<T, F, Fut>(&self, credentials: &Credentials, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let session = self.login(credentials).await?;
        let outcome = f(session.clone()).await;
        if let Err(e) = self.logout(&session).await {
            warn!(error = %e, "Failed to release session");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbprobe_mock::{MockBehavior, MockServer};

    fn client_for(server: &MockServer, timeout: Duration) -> ApiClient {
        let url = Url::parse(&server.base_url()).unwrap();
        ApiClient::new(url, timeout).unwrap()
    }

    fn admin() -> Credentials {
        Credentials::new("admin", "secret")
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = ApiClient::new(Url::parse("http://lb.local:8080/").unwrap(), Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(&["login"]).as_str(), "http://lb.local:8080/login");

        let nested = ApiClient::new(Url::parse("http://lb.local/api").unwrap(), Duration::from_secs(1)).unwrap();
        assert_eq!(
            nested.endpoint(&["pools", "vs web", "enable"]).as_str(),
            "http://lb.local/api/pools/vs%20web/enable"
        );
    }

    #[test]
    fn test_rejections_vs_transport() {
        assert!(ClientError::Auth { status: 401 }.is_rejection());
        assert!(ClientError::Api { status: 500 }.is_rejection());
        assert!(!ClientError::Timeout("connect".into()).is_rejection());
        assert!(!ClientError::Malformed("body".into()).is_rejection());
        assert!(ClientError::Mismatch {
            pool: "vs-web".into(),
            observed: PoolState::Enabled,
        }
        .is_rejection());
    }

    #[tokio::test]
    async fn test_login_and_pool_calls() {
        let server = MockServer::start(
            MockBehavior::new()
                .with_user("admin", "secret")
                .with_pool("vs-web")
                .with_failing_pool("vs-broken", 500),
        )
        .unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        let session = client.login(&admin()).await.unwrap();
        assert!(!session.token().is_empty());

        client.disable_pool(&session, "vs-web").await.unwrap();
        assert_eq!(server.state().pool_enabled("vs-web"), Some(false));
        client.enable_pool(&session, "vs-web").await.unwrap();
        assert_eq!(server.state().pool_enabled("vs-web"), Some(true));

        assert_eq!(
            client.enable_pool(&session, "vs-broken").await,
            Err(ClientError::Api { status: 500 })
        );
        assert_eq!(
            client.disable_pool(&session, "vs-missing").await,
            Err(ClientError::Api { status: 404 })
        );

        client.logout(&session).await.unwrap();
        assert_eq!(server.state().live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_pool_state_and_verified_updates() {
        let server = MockServer::start(
            MockBehavior::new()
                .with_user("admin", "secret")
                .with_pool("vs-web")
                .with_stuck_pool("vs-stuck"),
        )
        .unwrap();
        let client = client_for(&server, Duration::from_secs(5));
        let session = client.login(&admin()).await.unwrap();

        assert_eq!(client.pool_state(&session, "vs-web").await, Ok(PoolState::Enabled));
        client
            .set_pool_verified(&session, "vs-web", PoolState::Disabled)
            .await
            .unwrap();
        assert_eq!(client.pool_state(&session, "vs-web").await, Ok(PoolState::Disabled));

        let stuck = client.set_pool_verified(&session, "vs-stuck", PoolState::Disabled).await;
        assert_eq!(
            stuck,
            Err(ClientError::Mismatch {
                pool: "vs-stuck".to_string(),
                observed: PoolState::Enabled,
            })
        );
        assert_eq!(
            client.pool_state(&session, "vs-missing").await,
            Err(ClientError::Api { status: 404 })
        );
        assert_eq!(server.state().call_count("read"), 5);

        client.logout(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let server = MockServer::start(MockBehavior::new().with_user("admin", "secret")).unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        let err = client.login(&Credentials::new("admin", "wrong")).await.unwrap_err();
        assert_eq!(err, ClientError::Auth { status: 401 });
    }

    #[tokio::test]
    async fn test_register_accepts_existing_user() {
        let server = MockServer::start(MockBehavior::new().with_user("admin", "secret")).unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        client.register(&admin()).await.unwrap();
        client.register(&Credentials::new("ops", "pw")).await.unwrap();
        client.login(&Credentials::new("ops", "pw")).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start(
            MockBehavior::new()
                .with_user("admin", "secret")
                .with_latency(Duration::from_millis(500)),
        )
        .unwrap();
        let client = client_for(&server, Duration::from_millis(50));

        let err = client.login(&admin()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_connection_refused_is_timeout() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
        let client = ApiClient::new(url, Duration::from_secs(2)).unwrap();

        let err = client.login(&admin()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_with_session_always_logs_out() {
        let server = MockServer::start(MockBehavior::new().with_user("admin", "secret").with_pool("vs-web")).unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        let ok = client
            .with_session(&admin(), |session| {
                let client = &client;
                async move { client.disable_pool(&session, "vs-web").await }
            })
            .await;
        assert!(ok.is_ok());

        let failed = client
            .with_session(&admin(), |session| {
                let client = &client;
                async move { client.enable_pool(&session, "vs-missing").await }
            })
            .await;
        assert_eq!(failed, Err(ClientError::Api { status: 404 }));

        assert_eq!(server.state().call_count("login"), 2);
        assert_eq!(server.state().call_count("logout"), 2);
        assert_eq!(server.state().live_sessions(), 0);
    }
}
