use std::sync::Arc;

use log::{error, info};

use chunkworld::generator::FlatGenerator;
use chunkworld::{Config, WorldRegistry};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let name = config.default_world.clone();
    info!("Using world root {}", config.world_root.display());
    let registry = WorldRegistry::new(config, Arc::new(FlatGenerator::default()));

    let world = match registry.world(&name).await {
        Ok(world) => world,
        Err(e) => {
            error!("Couldn't open world {}: {}", name, e);
            return;
        }
    };
    match world.level().await {
        Ok(level) => info!(
            "World {} is up, spawn at {:?}, day time {}",
            level.name, level.spawn, level.time.day_time
        ),
        Err(e) => error!("World {} didn't start: {}", name, e),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Couldn't listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    registry.shutdown_all().await;
}
