//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::engine::{shutdown_requested, Coordinator};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub coordinator: Arc<Coordinator>,
}

/// Web server for pulsewatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            state: AppState {
                config,
                coordinator,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Pages
            .route("/", get(handlers::handle_home))
            .route("/ui/v1/", get(handlers::handle_home))
            .route("/ui/v1/status", get(handlers::handle_status_page))
            .route("/ui/v1/addMonitorForm", get(handlers::handle_add_monitor_form))
            // API endpoints
            .route("/api/v1/addmonitor", post(handlers::handle_add_monitor))
            .route("/api/v1/list", get(handlers::handle_list_monitors))
            .route("/api/v1/status", get(handlers::handle_status_json))
            .route("/api/v1/crontrigger", get(handlers::handle_cron_trigger))
            .route("/api/v1/checkURLS", get(handlers::handle_check_urls))
            .fallback(handlers::handle_not_found)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` fires.
    pub async fn start(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_requested(&mut shutdown).await;
                tracing::info!("Web server draining connections");
            })
            .await?;

        Ok(())
    }
}
