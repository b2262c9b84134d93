//! Uptime Chopper - self-hosted availability monitor.
//!
//! Probes HTTP endpoints and Docker containers, remediates failing
//! containers, and pushes status transitions to webhook channels.

mod config;
mod docker;
mod monitor;
mod notify;
mod store;
mod web;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use docker::DockerClient;
use monitor::{Engine, EngineDeps};
use notify::Dispatcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uptime_chopper=info".parse()?),
        )
        .init();

    let cfg = Config::load();
    tracing::info!("starting uptime-chopper on {}", cfg.http_addr);

    let store = store::open(&cfg.data_file_path)?;
    tracing::info!("store ready at {}", cfg.data_file_path);

    let docker = Arc::new(DockerClient::connect().await);
    if docker.is_mock() {
        tracing::info!("docker daemon unavailable, serving mock containers");
    } else if docker.has_docker().await {
        tracing::info!("docker daemon connected");
    }

    let notifier = Arc::new(Dispatcher::new(&cfg.notifications));

    let engine = Engine::new(EngineDeps {
        store: store.clone(),
        docker: docker.clone(),
        notifier,
        max_log_bytes: cfg.max_docker_log_bytes,
        default_log_since: cfg.default_docker_log_since,
    });
    engine.start();

    let server = web::Server::new(cfg, store, docker, engine.clone());
    server.start(shutdown_signal()).await?;

    engine.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
