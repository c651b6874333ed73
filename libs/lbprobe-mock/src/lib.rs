//! Mock load-balancer management API.
//!
//! Each `MockServer` is an explicit instance: it owns its scripted behavior,
//! sessions and call counters, listens on an ephemeral port, and stops when
//! the handle is dropped. Nothing is shared between instances.

mod handlers;
mod state;

pub use state::{MockBehavior, MockState, PoolScript};

use axum::{
    routing::{get, post},
    Router,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Routes of the wire contract
pub fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/pools/:name", get(handlers::get_pool))
        .route("/pools/:name/enable", post(handlers::enable_pool))
        .route("/pools/:name/disable", post(handlers::disable_pool))
        .with_state(state)
}

/// A running mock API bound to 127.0.0.1 on an ephemeral port
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl MockServer {
    /// Bind and start serving on a dedicated thread with its own runtime.
    ///
    /// The listener is bound before this returns, so requests issued right
    /// after `start` are queued rather than refused.
    pub fn start(behavior: MockBehavior) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockState::new(behavior));
        let app = router(state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(format!("mock-api-{}", addr.port()))
            .spawn(move || -> io::Result<()> {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()?;
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await
                })
            })?;

        info!(%addr, "Mock API listening");

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(addr = %self.addr, error = %e, "Mock API stopped with error"),
                Err(_) => warn!(addr = %self.addr, "Mock API thread panicked"),
            }
        }
    }
}
