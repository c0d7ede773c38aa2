use anyhow::{Context, Result};
use rollcall_store::Store;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod extractor;

use config::{BusKind, Config};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use extractor::CommandExtractor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let store = engine::spawn_store(store)?;

    let extractor = CommandExtractor::new(
        config.extractor_program.clone(),
        config.extractor_args.clone(),
        config.extractor_timeout(),
    );
    tracing::info!(
        program = extractor.program(),
        timeout = ?extractor.timeout(),
        "face extractor configured"
    );

    let engine = engine::Engine::new(store, Arc::new(extractor));
    let service = RollcallService::new(engine, config.clone());

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
