use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vigil_core::{EnrollmentStore, ExtractError, FrameSampler, SessionCache, SqliteStore};
use vigil_vision::OnnxExtractor;

mod config;
mod dbus_interface;
mod engine;
mod service;

use config::{BusKind, Config};
use dbus_interface::{VigilService, BUS_NAME, OBJECT_PATH};
use service::VerificationService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = Config::load().context("failed to load configuration")?;

    let store: Arc<dyn EnrollmentStore> = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open enrollment store at {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "enrollment store opened");

    let model_dir = config.model_dir.clone();
    let workers = engine::spawn_workers(
        config.workers,
        config.extract_timeout(),
        FrameSampler::new(config.video_stride),
        move || OnnxExtractor::load(&model_dir).map_err(ExtractError::from),
    )
    .context("failed to start extraction workers")?;

    let cache = SessionCache::new(config.session_capacity, Arc::clone(&store));
    let service = VerificationService::new(cache, store, workers);

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, VigilService::new(service))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(
        bus = ?config.bus,
        name = BUS_NAME,
        capacity = config.session_capacity,
        workers = config.workers,
        "vigild ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("vigild shutting down");

    Ok(())
}
