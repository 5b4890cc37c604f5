use std::sync::Arc;

use anyhow::{Context, Result};
use rollcall_core::{AttendanceLedger, EmbeddingStore, SystemClock};
use rollcall_store::{Roster, SqliteStorage};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod feed;
mod http;
mod service;

use config::{BusKind, Config};
use dbus_interface::{AttendanceInterface, BUS_NAME, OBJECT_PATH};
use service::AttendanceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        feed = %config.feed_path.display(),
        match_threshold = config.match_threshold,
        duplicate_threshold = config.duplicate_threshold,
        cooldown_minutes = config.cooldown_minutes,
        "configuration loaded"
    );

    let storage = Arc::new(
        SqliteStorage::open(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );
    let store = EmbeddingStore::load(storage.clone(), config.duplicate_threshold)
        .context("loading registered faces")?;
    let ledger = AttendanceLedger::load(storage, Arc::new(SystemClock))
        .context("loading attendance log")?
        .with_cooldown(config.cooldown());
    tracing::info!(profiles = store.len(), "stores loaded");

    let service = Arc::new(AttendanceService::new(store, ledger, config.clone()));

    if config.autostart {
        let svc = Arc::clone(&service);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = svc.start_detection() {
                tracing::warn!(error = %e, "detection autostart failed");
            }
        });
    }

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceInterface::new(Arc::clone(&service)))?
        .build()
        .await
        .context("registering on D-Bus")?;
    tracing::info!(bus = ?config.bus, name = BUS_NAME, "D-Bus interface registered");

    if config.http_enabled {
        let roster = Roster::open(&config.roster_path)
            .await
            .with_context(|| format!("opening {}", config.roster_path.display()))?;
        let listener = tokio::net::TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("binding {}", config.http_addr))?;
        tracing::info!(addr = %config.http_addr, "roster API listening");
        let app = http::build_router(Arc::new(roster));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "roster API stopped");
            }
        });
    }

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    let svc = Arc::clone(&service);
    tokio::task::spawn_blocking(move || svc.stop_detection()).await?;

    Ok(())
}
