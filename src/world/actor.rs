use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::block::{BlockId, BlockLookup, StaticBlocks};
use crate::chunk::actor::{recv_timeout, ChunkActorHandle, ChunkContext, ChunkMessage};
use crate::chunk::snapshot::ChunkSnapshot;
use crate::chunk::{BlockPos, Chunk, ChunkPos, LocalPos, SECTION_EDGE};
use crate::config::Config;
use crate::err::WorldError;
use crate::generator::Generator;
use crate::region::RegionManager;
use crate::world::events::{EntityInfo, Watcher, WorldEvent};
use crate::world::level::{LevelData, WorldTime};

/// The world clock runs at 20 ticks per second.
pub const WORLD_TICK: Duration = Duration::from_millis(50);

/// Largest number of blocks [`WorldHandle::get_blocks`] reads in one call.
pub const MAX_CUBOID_BLOCKS: u64 = 1 << 24;

pub(crate) enum WorldMessage {
    Route(ChunkPos, ChunkMessage),
    PlayerJoin(Watcher),
    PlayerLeave(Uuid),
    Players(oneshot::Sender<Vec<Uuid>>),
    Time(oneshot::Sender<WorldTime>),
    Level(oneshot::Sender<LevelData>),
    LoadedChunks(oneshot::Sender<Vec<ChunkPos>>),
    /// First half of the eviction handshake, proposed by an idle chunk.
    ChunkIdle { pos: ChunkPos, generation: u64 },
    Save(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/**
 * Owns the chunk actors of one world and routes every chunk request to the right one, spawning
 * it on first use. Also keeps the world clock, the connected players and the level file.
 */
struct WorldActor {
    receiver: Receiver<WorldMessage>,
    dir: PathBuf,
    config: Arc<Config>,
    context: ChunkContext,
    chunks: HashMap<ChunkPos, (ChunkActorHandle, u64)>,
    next_generation: u64,
    players: HashMap<Uuid, Watcher>,
    level: LevelData,
}

impl WorldActor {
    async fn run(&mut self) {
        let mut clock = interval(WORLD_TICK);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(msg) => {
                        if !self.handle(msg).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = clock.tick() => self.tick().await,
            }
        }
        info!("World {} stopped", self.level.name);
    }

    /// Returns false once the world has shut down.
    async fn handle(&mut self, msg: WorldMessage) -> bool {
        match msg {
            WorldMessage::Route(pos, msg) => self.route(pos, msg).await,
            WorldMessage::PlayerJoin(watcher) => {
                info!("Player {} joined {}", watcher.id, self.level.name);
                watcher.notify(self.time_update());
                self.players.insert(watcher.id, watcher);
            }
            WorldMessage::PlayerLeave(id) => {
                if self.players.remove(&id).is_some() {
                    info!("Player {} left {}", id, self.level.name);
                }
            }
            WorldMessage::Players(reply) => {
                let _ = reply.send(self.players.keys().copied().collect());
            }
            WorldMessage::Time(reply) => {
                let _ = reply.send(self.level.time);
            }
            WorldMessage::Level(reply) => {
                let _ = reply.send(self.level.clone());
            }
            WorldMessage::LoadedChunks(reply) => {
                let _ = reply.send(self.chunks.keys().copied().collect());
            }
            WorldMessage::ChunkIdle { pos, generation } => self.evict(pos, generation).await,
            WorldMessage::Save(reply) => {
                self.save(true).await;
                let _ = reply.send(());
            }
            WorldMessage::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn chunk(&mut self, pos: ChunkPos) -> ChunkActorHandle {
        if let Some((handle, _)) = self.chunks.get(&pos) {
            if !handle.is_closed() {
                return handle.clone();
            }
            warn!("Chunk actor {} exited unexpectedly, restarting it", pos);
        }
        self.next_generation += 1;
        let handle = ChunkActorHandle::new(pos, self.next_generation, self.context.clone());
        self.chunks.insert(pos, (handle.clone(), self.next_generation));
        handle
    }

    async fn route(&mut self, pos: ChunkPos, msg: ChunkMessage) {
        let Err(SendError(msg)) = self.chunk(pos).send(msg).await else {
            return;
        };
        // The actor went away between the check and the send.
        self.chunks.remove(&pos);
        if self.chunk(pos).send(msg).await.is_err() {
            error!("Couldn't deliver a message to chunk {}", pos);
        }
    }

    /// Asks an idle chunk to confirm its eviction. The world waits for the answer, so nothing can
    /// be routed to the chunk in the meantime.
    async fn evict(&mut self, pos: ChunkPos, generation: u64) {
        let Some((handle, current)) = self.chunks.get(&pos) else {
            return;
        };
        if *current != generation {
            return;
        }
        let (tx, rx) = oneshot::channel();
        let confirmed = match handle.send(ChunkMessage::ConfirmEvict(tx)).await {
            Ok(()) => rx.await.unwrap_or(true),
            Err(_) => true,
        };
        if confirmed {
            self.chunks.remove(&pos);
            debug!("Removed chunk {} from {}", pos, self.level.name);
        }
    }

    fn time_update(&self) -> WorldEvent {
        WorldEvent::TimeUpdate {
            world_age: self.level.time.world_age,
            day_time: self.level.time.day_time,
        }
    }

    async fn tick(&mut self) {
        self.level.time.tick();
        let age = self.level.time.world_age as u64;
        if age % self.config.time_broadcast_ticks.max(1) == 0 {
            let update = self.time_update();
            self.players.retain(|_, player| player.notify(update.clone()));
        }
        if age % self.config.autosave_ticks.max(1) == 0 {
            debug!("Autosaving {}", self.level.name);
            self.save(false).await;
        }
    }

    /// Saves the level file and asks every chunk to save. With `wait`, returns only once every
    /// chunk has written its data.
    async fn save(&mut self, wait: bool) {
        let world_age = self.level.time.world_age;
        let mut pending = vec![];
        for (handle, _) in self.chunks.values() {
            let (reply, rx) = if wait {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            if handle.send(ChunkMessage::Save { world_age, reply }).await.is_ok() {
                pending.extend(rx);
            }
        }
        for rx in pending {
            let _ = rx.await;
        }
        if let Err(e) = self.level.save(&self.dir).await {
            error!("Couldn't save level file of {}: {}", self.level.name, e);
        }
    }

    async fn shutdown(&mut self) {
        let mut pending = vec![];
        for (pos, (handle, _)) in self.chunks.drain() {
            let (tx, rx) = oneshot::channel();
            if handle.send(ChunkMessage::Shutdown(tx)).await.is_ok() {
                pending.push((pos, rx));
            }
        }
        for (pos, rx) in pending {
            if rx.await.is_err() {
                warn!("Chunk {} exited before confirming shutdown", pos);
            }
        }
        if let Err(e) = self.level.save(&self.dir).await {
            error!("Couldn't save level file of {}: {}", self.level.name, e);
        }
    }
}

/// Cheap, cloneable entry point to a running world.
#[derive(Clone)]
pub struct WorldHandle {
    sender: Sender<WorldMessage>,
    name: Arc<str>,
}

impl WorldHandle {
    /// Opens (or creates) the world stored under `config.world_root/<name>` and starts its actor.
    pub async fn open(
        name: &str,
        config: Arc<Config>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, WorldError> {
        Self::open_with_blocks(name, config, generator, Arc::new(StaticBlocks)).await
    }

    /// Like [`open`](Self::open), with chunks taking block properties from `blocks`.
    pub async fn open_with_blocks(
        name: &str,
        config: Arc<Config>,
        generator: Arc<dyn Generator>,
        blocks: Arc<dyn BlockLookup>,
    ) -> Result<Self, WorldError> {
        let dir = config.world_root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        let level = match LevelData::load(&dir, name).await {
            Ok(Some(level)) => level,
            Ok(None) => {
                info!("Creating world {} in {}", name, dir.display());
                LevelData::new(name)
            }
            Err(e) if e.is_corruption() => {
                warn!("Level file of {} is unreadable, starting over: {}", name, e);
                LevelData::new(name)
            }
            Err(e) => return Err(e),
        };

        let (sender, receiver) = mpsc::channel(config.mailbox_size);
        let context = ChunkContext {
            regions: Arc::new(RegionManager::new(dir.join("region"), &config.region_ext)),
            generator,
            blocks,
            config: config.clone(),
            world: sender.downgrade(),
        };
        let mut actor = WorldActor {
            receiver,
            dir,
            config,
            context,
            chunks: HashMap::new(),
            next_generation: 0,
            players: HashMap::new(),
            level,
        };
        tokio::spawn(async move { actor.run().await });
        Ok(Self {
            sender,
            name: name.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<T>(
        &self,
        msg: impl FnOnce(oneshot::Sender<T>) -> WorldMessage,
    ) -> Result<T, WorldError> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(msg(tx)).await?;
        Ok(rx.await?)
    }

    async fn route(&self, pos: ChunkPos, msg: ChunkMessage) -> Result<(), WorldError> {
        self.sender.send(WorldMessage::Route(pos, msg)).await?;
        Ok(())
    }

    /// Sends a callback to a chunk without waiting for it to run. The returned receiver yields
    /// the callback's result.
    async fn dispatch<R: Send + 'static>(
        &self,
        pos: ChunkPos,
        f: impl FnOnce(&mut Chunk) -> R + Send + 'static,
    ) -> Result<oneshot::Receiver<R>, WorldError> {
        let (tx, rx) = oneshot::channel();
        let callback = Box::new(move |chunk: &mut Chunk| {
            let _ = tx.send(f(chunk));
        });
        self.route(pos, ChunkMessage::Callback(callback)).await?;
        Ok(rx)
    }

    /// Runs `f` with exclusive access to a chunk, loading the chunk first if needed.
    pub async fn with_chunk<R: Send + 'static>(
        &self,
        pos: ChunkPos,
        f: impl FnOnce(&mut Chunk) -> R + Send + 'static,
    ) -> Result<R, WorldError> {
        Ok(self.dispatch(pos, f).await?.await?)
    }

    async fn with_block<R: Send + 'static>(
        &self,
        pos: BlockPos,
        f: impl FnOnce(&mut Chunk, LocalPos) -> R + Send + 'static,
    ) -> Result<R, WorldError> {
        let (chunk, local) = pos.split()?;
        self.with_chunk(chunk, move |c| f(c, local)).await
    }

    /// Sets a block and returns the one it replaced.
    pub async fn set_block(&self, pos: BlockPos, block: BlockId) -> Result<BlockId, WorldError> {
        self.with_block(pos, move |c, local| c.set_block(local, block))
            .await
    }

    pub async fn get_block(&self, pos: BlockPos) -> Result<BlockId, WorldError> {
        self.with_block(pos, |c, local| c.get_block(local)).await
    }

    pub async fn set_meta(&self, pos: BlockPos, meta: u8) -> Result<(), WorldError> {
        self.with_block(pos, move |c, local| c.set_meta(local, meta))
            .await
    }

    pub async fn get_meta(&self, pos: BlockPos) -> Result<u8, WorldError> {
        self.with_block(pos, |c, local| c.get_meta(local)).await
    }

    pub async fn set_block_light(&self, pos: BlockPos, light: u8) -> Result<(), WorldError> {
        self.with_block(pos, move |c, local| c.set_block_light(local, light))
            .await
    }

    /// Block light after any pending relight of the chunk.
    pub async fn get_block_light(&self, pos: BlockPos) -> Result<u8, WorldError> {
        self.with_block(pos, |c, local| {
            if c.needs_relight() {
                c.relight();
            }
            c.get_block_light(local)
        })
        .await
    }

    pub async fn set_sky_light(&self, pos: BlockPos, light: u8) -> Result<(), WorldError> {
        self.with_block(pos, move |c, local| c.set_sky_light(local, light))
            .await
    }

    pub async fn get_sky_light(&self, pos: BlockPos) -> Result<u8, WorldError> {
        self.with_block(pos, |c, local| c.get_sky_light(local)).await
    }

    pub async fn set_biome(&self, x: i32, z: i32, biome: u8) -> Result<(), WorldError> {
        let edge = SECTION_EDGE as i32;
        let (lx, lz) = (x.rem_euclid(edge) as u8, z.rem_euclid(edge) as u8);
        self.with_chunk(ChunkPos::containing(x, z), move |c| c.set_biome(lx, lz, biome))
            .await
    }

    pub async fn get_biome(&self, x: i32, z: i32) -> Result<u8, WorldError> {
        let edge = SECTION_EDGE as i32;
        let (lx, lz) = (x.rem_euclid(edge) as u8, z.rem_euclid(edge) as u8);
        self.with_chunk(ChunkPos::containing(x, z), move |c| c.get_biome(lx, lz))
            .await
    }

    /**
     * Reads every block of the cuboid spanned by two corners (inclusive).
     *
     * One callback is sent to every chunk the cuboid touches before any answer is awaited. The
     * result is ordered x first, then z, then y. Cuboids above [`MAX_CUBOID_BLOCKS`] are refused.
     */
    pub async fn get_blocks(&self, a: BlockPos, b: BlockPos) -> Result<Vec<BlockId>, WorldError> {
        let min = BlockPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z));
        let max = BlockPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z));
        min.split()?;
        max.split()?;
        let span = |low: i32, high: i32| (high as i64 - low as i64 + 1) as u64;
        let (size_x, size_y, size_z) = (span(min.x, max.x), span(min.y, max.y), span(min.z, max.z));
        let volume = size_x
            .checked_mul(size_z)
            .and_then(|area| area.checked_mul(size_y))
            .filter(|volume| *volume <= MAX_CUBOID_BLOCKS)
            .ok_or(WorldError::CuboidTooLarge(
                size_x.saturating_mul(size_z).saturating_mul(size_y),
            ))?;
        let (size_x, size_z) = (size_x as usize, size_z as usize);

        let from = min.chunk();
        let to = max.chunk();
        let mut pending = vec![];
        for cx in from.x..=to.x {
            for cz in from.z..=to.z {
                let pos = ChunkPos::new(cx, cz);
                let rx = self
                    .dispatch(pos, move |chunk| {
                        let edge = SECTION_EDGE as i32;
                        let (base_x, base_z) = (cx * edge, cz * edge);
                        let mut found = vec![];
                        for y in min.y..=max.y {
                            for z in min.z.max(base_z)..=max.z.min(base_z + edge - 1) {
                                for x in min.x.max(base_x)..=max.x.min(base_x + edge - 1) {
                                    let local =
                                        LocalPos::new((x - base_x) as u8, y as u8, (z - base_z) as u8);
                                    let index = ((y - min.y) as usize * size_z
                                        + (z - min.z) as usize)
                                        * size_x
                                        + (x - min.x) as usize;
                                    found.push((index, chunk.get_block(local)));
                                }
                            }
                        }
                        found
                    })
                    .await?;
                pending.push(rx);
            }
        }

        let mut blocks = vec![0; volume as usize];
        for rx in pending {
            for (index, block) in rx.await? {
                blocks[index] = block;
            }
        }
        Ok(blocks)
    }

    pub async fn chunk_snapshot(&self, pos: ChunkPos) -> Result<ChunkSnapshot, WorldError> {
        let (tx, rx) = oneshot::channel();
        self.route(pos, ChunkMessage::Snapshot(tx)).await?;
        Ok(rx.await?)
    }

    /// Like [`chunk_snapshot`](Self::chunk_snapshot) but gives up after `timeout`. A request that
    /// timed out is withdrawn and never encoded for.
    pub async fn chunk_snapshot_timeout(
        &self,
        pos: ChunkPos,
        timeout: Duration,
    ) -> Result<ChunkSnapshot, WorldError> {
        let (tx, rx) = oneshot::channel();
        self.route(pos, ChunkMessage::Snapshot(tx)).await?;
        recv_timeout(rx, timeout).await
    }

    /// Places an entity in the chunk below its position.
    pub async fn entity_join(&self, entity: EntityInfo) -> Result<(), WorldError> {
        self.route(entity.chunk(), ChunkMessage::EntityJoin(entity))
            .await
    }

    pub async fn entity_leave(&self, pos: ChunkPos, id: Uuid) -> Result<(), WorldError> {
        self.route(pos, ChunkMessage::EntityLeave(id)).await
    }

    pub async fn entities_in(&self, pos: ChunkPos) -> Result<Vec<EntityInfo>, WorldError> {
        let (tx, rx) = oneshot::channel();
        self.route(pos, ChunkMessage::Entities(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn watcher_join(&self, pos: ChunkPos, watcher: Watcher) -> Result<(), WorldError> {
        self.route(pos, ChunkMessage::WatcherJoin(watcher)).await
    }

    pub async fn watcher_leave(&self, pos: ChunkPos, id: Uuid) -> Result<(), WorldError> {
        self.route(pos, ChunkMessage::WatcherLeave(id)).await
    }

    /// Delivers a payload to every watcher of a chunk except `except`.
    pub async fn broadcast(
        &self,
        pos: ChunkPos,
        except: Option<Uuid>,
        payload: impl Into<Arc<[u8]>>,
    ) -> Result<(), WorldError> {
        let payload = payload.into();
        self.route(pos, ChunkMessage::Broadcast { except, payload })
            .await
    }

    pub async fn player_join(&self, watcher: Watcher) -> Result<(), WorldError> {
        self.sender.send(WorldMessage::PlayerJoin(watcher)).await?;
        Ok(())
    }

    pub async fn player_leave(&self, id: Uuid) -> Result<(), WorldError> {
        self.sender.send(WorldMessage::PlayerLeave(id)).await?;
        Ok(())
    }

    pub async fn players(&self) -> Result<Vec<Uuid>, WorldError> {
        self.request(WorldMessage::Players).await
    }

    pub async fn time(&self) -> Result<WorldTime, WorldError> {
        self.request(WorldMessage::Time).await
    }

    pub async fn level(&self) -> Result<LevelData, WorldError> {
        self.request(WorldMessage::Level).await
    }

    pub async fn loaded_chunks(&self) -> Result<Vec<ChunkPos>, WorldError> {
        self.request(WorldMessage::LoadedChunks).await
    }

    /// Saves every loaded chunk and the level file.
    pub async fn save(&self) -> Result<(), WorldError> {
        self.request(WorldMessage::Save).await
    }

    /// Saves and stops every chunk, then stops the world.
    pub async fn shutdown(&self) -> Result<(), WorldError> {
        self.request(WorldMessage::Shutdown).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{AIR, BEDROCK, DIRT, GLASS, GRASS, STONE, TORCH};
    use crate::generator::FlatGenerator;

    async fn open(dir: &std::path::Path, config: Config) -> Result<WorldHandle, WorldError> {
        let config = Config {
            world_root: dir.to_path_buf(),
            ..config
        };
        WorldHandle::open("test", Arc::new(config), Arc::new(FlatGenerator::default())).await
    }

    /// Stock blocks, except that glass glows.
    struct GlowingGlass;

    impl BlockLookup for GlowingGlass {
        fn props(&self, id: BlockId) -> crate::block::BlockProps {
            let mut props = StaticBlocks.props(id);
            if id == GLASS {
                props.emission = 7;
            }
            props
        }
    }

    #[tokio::test]
    async fn chunks_use_the_world_block_table() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            world_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let world = WorldHandle::open_with_blocks(
            "glow",
            Arc::new(config),
            Arc::new(FlatGenerator::default()),
            Arc::new(GlowingGlass),
        )
        .await?;
        world.set_block(BlockPos::new(3, 70, 3), GLASS).await?;
        assert_eq!(world.get_block_light(BlockPos::new(3, 70, 3)).await?, 7);
        assert_eq!(world.get_block_light(BlockPos::new(3, 72, 3)).await?, 5);
        world.shutdown().await
    }

    #[tokio::test]
    async fn torch_next_to_stone() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        world.set_block(BlockPos::new(0, 64, 0), STONE).await?;
        world.set_block(BlockPos::new(1, 64, 0), TORCH).await?;
        assert_eq!(world.get_block_light(BlockPos::new(1, 64, 0)).await?, 14);
        assert_eq!(world.get_block_light(BlockPos::new(2, 64, 0)).await?, 13);
        assert_eq!(world.get_block_light(BlockPos::new(0, 64, 0)).await?, 0);
        world.shutdown().await
    }

    #[tokio::test]
    async fn block_helpers_translate_coordinates() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        let pos = BlockPos::new(-17, 80, 33);
        assert_eq!(world.set_block(pos, GLASS).await?, AIR);
        world.set_meta(pos, 7).await?;
        assert_eq!(world.get_block(pos).await?, GLASS);
        assert_eq!(world.get_meta(pos).await?, 7);
        assert_eq!(world.get_sky_light(pos).await?, 15);
        world.set_biome(-17, 33, 4).await?;
        assert_eq!(world.get_biome(-17, 33).await?, 4);
        assert_eq!(
            world
                .with_chunk(ChunkPos::new(-2, 2), |c| c.get_block(LocalPos::new(15, 80, 1)))
                .await?,
            GLASS
        );
        assert!(matches!(
            world.get_block(BlockPos::new(0, 256, 0)).await,
            Err(WorldError::OutOfBounds { .. })
        ));
        let mut loaded = world.loaded_chunks().await?;
        loaded.sort();
        assert_eq!(loaded, vec![ChunkPos::new(-2, 2)]);
        world.shutdown().await
    }

    #[tokio::test]
    async fn get_blocks_spans_chunks() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        world.set_block(BlockPos::new(-1, 63, 15), STONE).await?;
        world.set_block(BlockPos::new(16, 62, 16), AIR).await?;

        let blocks = world
            .get_blocks(BlockPos::new(16, 64, 16), BlockPos::new(-1, 62, 15))
            .await?;
        let (size_x, size_z) = (18, 2);
        assert_eq!(blocks.len(), size_x * size_z * 3);
        let at = |x: i32, y: i32, z: i32| {
            blocks[((y - 62) as usize * size_z + (z - 15) as usize) * size_x + (x + 1) as usize]
        };
        assert_eq!(at(-1, 63, 15), STONE);
        assert_eq!(at(0, 63, 15), GRASS);
        assert_eq!(at(16, 62, 16), AIR);
        assert_eq!(at(5, 62, 16), DIRT);
        assert_eq!(at(5, 64, 16), AIR);
        assert_eq!(world.loaded_chunks().await?.len(), 6);
        world.shutdown().await
    }

    #[tokio::test]
    async fn get_blocks_handles_extreme_corners() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        let result = world
            .get_blocks(BlockPos::new(i32::MIN, 0, 0), BlockPos::new(i32::MAX, 255, 0))
            .await;
        assert!(matches!(result, Err(WorldError::CuboidTooLarge(_))));
        assert!(world.loaded_chunks().await?.is_empty());

        let blocks = world
            .get_blocks(
                BlockPos::new(i32::MAX - 1, 0, i32::MAX),
                BlockPos::new(i32::MAX, 1, i32::MAX),
            )
            .await?;
        assert_eq!(blocks, vec![BEDROCK, BEDROCK, STONE, STONE]);
        world.shutdown().await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_see_a_total_order() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        let palette = [STONE, GLASS, TORCH, DIRT];
        let mut tasks = vec![];
        for writer in 0..8usize {
            let world = world.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50i32 {
                    // Half of the writes go to positions shared by all writers.
                    let x = if i % 2 == 0 { i % 4 } else { writer as i32 + 4 };
                    let pos = BlockPos::new(x, 100 + i % 3, 0);
                    world.set_block(pos, palette[writer % palette.len()]).await?;
                }
                Ok::<_, WorldError>(())
            }));
        }
        for task in tasks {
            task.await.expect("writer panicked")?;
        }

        for x in 0..12 {
            for y in 100..103 {
                let block = world.get_block(BlockPos::new(x, y, 0)).await?;
                assert!(block == AIR || palette.contains(&block), "torn write {}", block);
            }
        }
        // Every exclusive position holds exactly its writer's block.
        for writer in 0..8usize {
            let block = world.get_block(BlockPos::new(writer as i32 + 4, 101, 0)).await?;
            assert_eq!(block, palette[writer % palette.len()]);
        }
        world.shutdown().await
    }

    #[tokio::test]
    async fn entities_and_watchers_are_routed() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        let chunk = ChunkPos::new(1, -1);
        let (watcher, mut events) = Watcher::new(Uuid::new_v4());
        world.watcher_join(chunk, watcher.clone()).await?;

        let cow = EntityInfo::new(Uuid::new_v4(), "cow", 20.0, 64.0, -3.0);
        world.entity_join(cow.clone()).await?;
        assert_eq!(events.recv().await, Some(WorldEvent::EntitySpawn(cow.clone())));
        assert_eq!(world.entities_in(chunk).await?, vec![cow.clone()]);

        world.broadcast(chunk, Some(cow.id), &b"moo"[..]).await?;
        match events.recv().await {
            Some(WorldEvent::Message { from, payload }) => {
                assert_eq!(from, Some(cow.id));
                assert_eq!(&payload[..], b"moo");
            }
            other => panic!("unexpected event {:?}", other),
        }

        world.entity_leave(chunk, cow.id).await?;
        assert_eq!(events.recv().await, Some(WorldEvent::EntityDespawn(cow.id)));
        world.watcher_leave(chunk, watcher.id).await?;
        assert!(world.entities_in(chunk).await?.is_empty());
        world.shutdown().await
    }

    #[tokio::test]
    async fn players_receive_time_updates() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            time_broadcast_ticks: 2,
            ..Config::default()
        };
        let world = open(dir.path(), config).await?;
        let (player, mut events) = Watcher::new(Uuid::new_v4());
        world.player_join(player.clone()).await?;
        assert_eq!(world.players().await?, vec![player.id]);

        // One update on join, then one every other tick.
        let mut ages = vec![];
        while ages.len() < 3 {
            if let Some(WorldEvent::TimeUpdate { world_age, day_time }) = events.recv().await {
                assert_eq!(world_age % 24000, day_time);
                ages.push(world_age);
            }
        }
        assert!(ages[1] > ages[0] && ages[2] > ages[1]);
        assert!(world.time().await?.world_age >= ages[2]);

        world.player_leave(player.id).await?;
        assert!(world.players().await?.is_empty());
        world.shutdown().await
    }

    #[tokio::test]
    async fn state_survives_a_restart() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        world.set_block(BlockPos::new(100, 120, -100), STONE).await?;
        world.set_block(BlockPos::new(0, 0, 0), AIR).await?;
        world.save().await?;
        assert!(dir.path().join("test/region/r.0.-1.mca").exists());
        assert!(dir.path().join("test/level.dat").exists());
        let age = world.time().await?.world_age;
        world.shutdown().await?;

        let world = open(dir.path(), Config::default()).await?;
        assert_eq!(world.get_block(BlockPos::new(100, 120, -100)).await?, STONE);
        assert_eq!(world.get_block(BlockPos::new(0, 0, 0)).await?, AIR);
        assert_eq!(world.get_block(BlockPos::new(1, 0, 0)).await?, BEDROCK);
        assert!(world.time().await?.world_age >= age);
        assert_eq!(world.level().await?.name, "test");
        world.shutdown().await
    }

    #[tokio::test]
    async fn idle_chunks_are_evicted_and_reloaded() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            chunk_idle: Duration::from_millis(40),
            ..Config::default()
        };
        let world = open(dir.path(), config).await?;
        world.set_block(BlockPos::new(3, 90, 3), GLASS).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !world.loaded_chunks().await?.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "chunk was never evicted");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(world.get_block(BlockPos::new(3, 90, 3)).await?, GLASS);
        world.shutdown().await
    }

    #[tokio::test]
    async fn watched_chunk_stays_loaded() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            chunk_idle: Duration::from_millis(20),
            ..Config::default()
        };
        let world = open(dir.path(), config).await?;
        let (watcher, _events) = Watcher::new(Uuid::new_v4());
        world.watcher_join(ChunkPos::new(0, 0), watcher).await?;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            // Requests from the watcher never hit an evicted chunk.
            assert_eq!(world.get_block(BlockPos::new(0, 0, 0)).await?, BEDROCK);
            assert_eq!(world.loaded_chunks().await?, vec![ChunkPos::new(0, 0)]);
        }
        world.shutdown().await
    }

    #[tokio::test]
    async fn snapshot_timeout_reports_timeout() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        let snapshot = world
            .chunk_snapshot_timeout(ChunkPos::new(0, 0), Duration::from_secs(10))
            .await?;
        assert_eq!(snapshot.decode().await?.primary_mask, 0b1111);
        let result = world
            .chunk_snapshot_timeout(ChunkPos::new(1, 0), Duration::ZERO)
            .await;
        // A zero timeout may still win against a fast chunk, but never reads as removed.
        assert!(!matches!(result, Err(WorldError::Removed)));
        assert!(world.chunk_snapshot(ChunkPos::new(1, 0)).await.is_ok());
        world.shutdown().await
    }

    #[tokio::test]
    async fn stopped_world_reports_removed() -> Result<(), WorldError> {
        let dir = tempfile::tempdir()?;
        let world = open(dir.path(), Config::default()).await?;
        world.shutdown().await?;
        assert!(matches!(world.time().await, Err(WorldError::Removed)));
        Ok(())
    }
}
