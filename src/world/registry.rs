use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;

use crate::block::{BlockLookup, StaticBlocks};
use crate::config::Config;
use crate::err::WorldError;
use crate::generator::Generator;
use crate::world::actor::WorldHandle;

/// Worlds of a process by name, opened on first access.
///
/// Nothing here is global: every registry has its own configuration, so tests can run
/// isolated registries side by side.
pub struct WorldRegistry {
    config: Arc<Config>,
    generator: Arc<dyn Generator>,
    blocks: Arc<dyn BlockLookup>,
    worlds: Mutex<HashMap<String, WorldHandle>>,
}

impl WorldRegistry {
    pub fn new(config: Config, generator: Arc<dyn Generator>) -> Self {
        Self {
            config: Arc::new(config),
            generator,
            blocks: Arc::new(StaticBlocks),
            worlds: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the block table handed to worlds opened from now on.
    pub fn with_blocks(mut self, blocks: Arc<dyn BlockLookup>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the running world with this name, opening it if needed.
    pub async fn world(&self, name: &str) -> Result<WorldHandle, WorldError> {
        let mut worlds = self.worlds.lock().await;
        if let Some(world) = worlds.get(name) {
            return Ok(world.clone());
        }
        let world = WorldHandle::open_with_blocks(
            name,
            self.config.clone(),
            self.generator.clone(),
            self.blocks.clone(),
        )
        .await?;
        info!("Opened world {}", name);
        worlds.insert(name.to_string(), world.clone());
        Ok(world)
    }

    pub async fn names(&self) -> Vec<String> {
        self.worlds.lock().await.keys().cloned().collect()
    }

    /// Saves and stops every open world.
    pub async fn shutdown_all(&self) {
        let worlds: Vec<_> = self.worlds.lock().await.drain().collect();
        for (name, world) in worlds {
            match world.shutdown().await {
                Ok(()) => info!("Closed world {}", name),
                Err(e) => warn!("World {} was already gone: {}", name, e),
            }
        }
    }
}
