//! HTTP API for bookmark snapshots.
//!
//! Provides:
//! - Bookmark creation with background archiving
//! - Cache status, with one synchronous attempt for pending bookmarks
//! - Offline retrieval of snapshot files and listings, by record id or by
//!   the bookmark filename from the cache index
//!
//! The owner of every request is taken from the `x-owner-id` header set by
//! the authenticating proxy.

mod error;
mod handlers;
mod owner;
mod routes;

pub use error::AppError;
pub use handlers::CacheStatusResponse;
pub use owner::{Owner, OWNER_HEADER};
pub use routes::create_router;

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::Settings;
use crate::repository;
use crate::services::{ArchiveQueue, Services};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let (pool, blobs) = repository::open(settings).await?;
    let services = Services::from_settings(settings, pool, blobs)?;

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Starting server at http://{}", addr);

    run(listener, services, settings.worker_count, shutdown_signal()).await
}

/// Serve on `listener` with background archive workers until `shutdown`
/// resolves, then wait for queued archives to finish.
pub async fn run<F>(
    listener: TcpListener,
    services: Services,
    worker_count: usize,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (queue, dispatcher) = ArchiveQueue::start(services.archive.clone(), worker_count);
    let app = create_router(AppState::new(services.with_queue(queue)));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    // The router and its queue handle are gone; wait for queued attempts.
    tracing::info!("Waiting for background archives to finish");
    dispatcher.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
