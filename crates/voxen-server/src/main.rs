mod config;
mod error;
mod generator;
mod world;

use std::sync::mpsc;

use config::ServerConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match ServerConfig::load("server.toml") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load server.toml: {e}");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Voxen Server v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "World: {} (seed: {}, spawn radius: {})",
        config.world.name, config.world.seed, config.world.spawn_radius
    );
    info!(
        "Storage backend: {}, workers: {}",
        config.storage.backend, config.workers.threads
    );

    // Storage calls block, so the world runs off the async runtime.
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let mut world = tokio::task::spawn_blocking(move || world::run(&config, shutdown_rx));

    let joined = tokio::select! {
        joined = &mut world => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
            world.await
        }
    };

    match joined {
        Ok(Ok(report)) => info!(
            "World closed: {} region(s) loaded, {} generated, {} saved",
            report.loaded, report.generated, report.saved
        ),
        Ok(Err(e)) => {
            error!("World stopped with an error: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!("World thread failed: {e}");
            std::process::exit(1);
        }
    }
}
