//! Web dashboard and JSON API for olbd.
//!
//! ## Endpoints
//!
//! - `GET /` - Serves the embedded dashboard page
//! - `/api/config*` - Redacted configuration and settings updates
//! - `/api/projects*` - Project CRUD
//! - `POST /api/backup` - Run a batch now
//! - `GET /api/backups/{project_id}` - Archives of one project
//! - `GET /api/status` - Totals and scheduler state

mod routes;

use axum::{
    Router,
    response::Html,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::core::Orchestrator;
use crate::scheduler::Scheduler;
use crate::store::ConfigStore;

/// Embedded HTML dashboard
const INDEX_HTML: &str = include_str!("assets/index.html");

/// Shared state for the web server
#[derive(Clone)]
pub struct WebState {
    pub store: Arc<ConfigStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<Scheduler>,
}

impl WebState {
    pub fn new(orchestrator: Arc<Orchestrator>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            store: orchestrator.context().store.clone(),
            orchestrator,
            scheduler,
        }
    }
}

/// Build the application router.
pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/config", get(routes::get_config))
        .route("/api/config/server", post(routes::update_server))
        .route("/api/config/backup", post(routes::update_backup))
        .route(
            "/api/projects",
            get(routes::list_projects).post(routes::add_project),
        )
        .route(
            "/api/projects/{index}",
            put(routes::update_project).delete(routes::delete_project),
        )
        .route("/api/projects/{index}/toggle", post(routes::toggle_project))
        .route("/api/backup", post(routes::run_backup))
        .route("/api/backups/{project_id}", get(routes::list_backups))
        .route("/api/status", get(routes::status))
        .with_state(state)
}

/// Web server for the dashboard UI.
pub struct WebServer {
    bind_addr: SocketAddr,
    state: WebState,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(state: WebState, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            bind_addr,
            state,
            shutdown_tx,
        }
    }

    /// Start the web server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Web dashboard listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Serve the embedded index.html
async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
