//! Web server: router, shared state, CORS and SPA serving.

mod handlers;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::docker::DockerClient;
use crate::monitor::Engine;
use crate::store::Store;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub docker: Arc<DockerClient>,
    pub engine: Arc<Engine>,
}

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        docker: Arc<DockerClient>,
        engine: Arc<Engine>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                docker,
                engine,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let api = Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/monitors",
                get(handlers::list_monitors).post(handlers::create_monitor),
            )
            .route(
                "/monitors/{id}",
                put(handlers::update_monitor).delete(handlers::delete_monitor),
            )
            .route("/monitors/{id}/pause", post(handlers::pause_monitor))
            .route("/monitors/{id}/resume", post(handlers::resume_monitor))
            .route("/monitors/{id}/history", get(handlers::monitor_history))
            .route("/status", get(handlers::status))
            .route(
                "/notifications",
                get(handlers::list_notifications).post(handlers::create_notification),
            )
            .route(
                "/notifications/{id}",
                put(handlers::update_notification).delete(handlers::delete_notification),
            )
            .route("/containers", get(handlers::list_containers))
            .route("/containers/{id}/logs", get(handlers::container_logs))
            .route("/containers/{id}/start", post(handlers::start_container))
            .route("/containers/{id}/stop", post(handlers::stop_container))
            .route("/containers/{id}/restart", post(handlers::restart_container))
            .route(
                "/containers/{id}/restart-policy",
                put(handlers::update_restart_policy),
            );

        let mut router = Router::new().nest("/api", api);

        if self.state.config.serve_frontend_from_dist {
            let dist = Path::new(&self.state.config.frontend_dist_directory);
            if dist.is_dir() {
                let index = dist.join("index.html");
                router = router.fallback_service(ServeDir::new(dist).fallback(ServeFile::new(index)));
            }
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(30)))
            .layer(cors_layer(&self.state.config.allowed_cors_origin))
            .layer(DefaultBodyLimit::max(1024 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown future resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.state.config.http_addr).await?;
        tracing::info!("http listening on {}", self.state.config.http_addr);
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if allowed_origin == "*" {
        return cors.allow_origin(Any);
    }
    match allowed_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(allowed_origin, "invalid CORS origin, allowing any");
            cors.allow_origin(Any)
        }
    }
}
