use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use log::{error, info};
use tokio::signal;
use tokio::sync::{oneshot, Mutex};

use afyadb::api::rest::RestApi;
use afyadb::config::load_config;
use afyadb::{Engine, JsonFileStore, SystemClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config(Path::new("config.yaml"))?;
    info!("Starting AfyaDB with document {}", config.storage.path.display());

    let store = JsonFileStore::new(&config.storage.path);
    let mut engine = Engine::open(store, SystemClock)?;
    if let Some(facility) = &config.facility.name {
        engine = engine.with_facility(facility.as_str());
    }
    let engine = Arc::new(Mutex::new(engine));

    let api = RestApi::new(Arc::clone(&engine));
    let addr = config.api.socket_addr()?;

    // Create a channel for shutdown signal
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let (bound, server) = warp::serve(api.routes()).try_bind_with_graceful_shutdown(addr, async move {
        shutdown_rx.await.ok();
        info!("Shutting down server...");
    })?;
    info!("Listening on {}", bound);

    let server_handle = tokio::spawn(server);

    signal::ctrl_c().await?;
    info!("Ctrl+C received, starting graceful shutdown");
    shutdown_tx.send(()).ok();

    if let Err(e) = server_handle.await {
        error!("Server task failed: {}", e);
    }

    // every mutation is already on disk; just report what is there
    let engine = engine.lock().await;
    info!(
        "Server shutdown complete ({} registers)",
        engine.registers().len()
    );
    Ok(())
}
