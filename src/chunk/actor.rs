use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{self, Receiver, Sender, WeakSender};
use tokio::sync::oneshot;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::block::BlockLookup;
use crate::chunk::snapshot::ChunkSnapshot;
use crate::chunk::{BlockPos, Chunk, ChunkPos, SECTION_EDGE};
use crate::config::Config;
use crate::generator::{FlatGenerator, Generator};
use crate::region::{ChunkLoad, Region, RegionManager, RegionPos};
use crate::world::actor::WorldMessage;
use crate::world::events::{EntityInfo, Watcher, WorldEvent};

pub type ChunkCallback = Box<dyn FnOnce(&mut Chunk) + Send>;

pub(crate) enum ChunkMessage {
    /// Network snapshot, relit first if needed. Dropping the receiver withdraws the request.
    Snapshot(oneshot::Sender<ChunkSnapshot>),
    WatcherJoin(Watcher),
    WatcherLeave(Uuid),
    EntityJoin(EntityInfo),
    EntityLeave(Uuid),
    Entities(oneshot::Sender<Vec<EntityInfo>>),
    Broadcast {
        except: Option<Uuid>,
        payload: Arc<[u8]>,
    },
    Callback(ChunkCallback),
    Save {
        world_age: i64,
        reply: Option<oneshot::Sender<()>>,
    },
    /// Second half of the eviction handshake. Answers true only if the chunk stayed idle; the
    /// actor has then saved, released its region and stopped.
    ConfirmEvict(oneshot::Sender<bool>),
    Shutdown(oneshot::Sender<()>),
}

impl ChunkMessage {
    /// Messages that count as activity and postpone eviction.
    fn is_work(&self) -> bool {
        !matches!(self, ChunkMessage::ConfirmEvict(_) | ChunkMessage::Save { .. })
    }
}

/// Everything a chunk actor needs from its world.
#[derive(Clone)]
pub(crate) struct ChunkContext {
    pub(crate) regions: Arc<RegionManager>,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) blocks: Arc<dyn BlockLookup>,
    pub(crate) config: Arc<Config>,
    pub(crate) world: WeakSender<WorldMessage>,
}

enum Flow {
    Continue,
    Stop,
}

/**
 * Sole owner of one chunk. Every read and write of the chunk goes through the mailbox and is
 * handled in arrival order, except that bursts of snapshot requests are answered together.
 *
 * Besides the mailbox the actor runs two timers: a tick that relights pending changes and counts
 * inhabited time, and an idle timer that saves an unwatched chunk and then asks the world to
 * evict it.
 */
struct ChunkActor {
    receiver: Receiver<ChunkMessage>,
    pos: ChunkPos,
    generation: u64,
    chunk: Chunk,
    region: Arc<Region>,
    context: ChunkContext,
    watchers: HashMap<Uuid, Watcher>,
    entities: HashMap<Uuid, EntityInfo>,
    snapshot: Option<ChunkSnapshot>,
    deferred: VecDeque<ChunkMessage>,
    idle_strikes: u8,
}

impl ChunkActor {
    /// Loads the chunk from its region, generating it when there is nothing (readable) stored.
    async fn start(
        receiver: Receiver<ChunkMessage>,
        pos: ChunkPos,
        generation: u64,
        context: ChunkContext,
    ) -> Option<Self> {
        let region = match context.regions.acquire(pos).await {
            Ok(region) => region,
            Err(e) => {
                error!("Couldn't open region for chunk {}: {}", pos, e);
                return None;
            }
        };
        let mut chunk = match region.load(pos).await {
            ChunkLoad::Present(mut chunk) => {
                chunk.set_blocks(context.blocks.clone());
                trace!("Loaded chunk {}", pos);
                chunk
            }
            ChunkLoad::Missing => {
                let mut chunk = Chunk::with_blocks(pos, context.blocks.clone());
                context.generator.generate(pos.x, pos.z, &mut chunk);
                trace!("Generated chunk {}", pos);
                chunk
            }
            ChunkLoad::Corrupt(e) => {
                warn!("Chunk {} is corrupted, regenerating it: {}", pos, e);
                let mut chunk = Chunk::with_blocks(pos, context.blocks.clone());
                FlatGenerator::default().generate(pos.x, pos.z, &mut chunk);
                chunk
            }
        };
        // Freshly generated terrain is part of the chunk, not a change to broadcast.
        chunk.take_changes();
        Some(Self {
            receiver,
            pos,
            generation,
            chunk,
            region,
            context,
            watchers: HashMap::new(),
            entities: HashMap::new(),
            snapshot: None,
            deferred: VecDeque::new(),
            idle_strikes: 0,
        })
    }

    async fn run(&mut self) {
        let mut tick = interval(self.context.config.chunk_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle_period = self.context.config.chunk_idle;
        let mut idle = interval_at(Instant::now() + idle_period, idle_period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let msg = match self.deferred.pop_front() {
                Some(msg) => msg,
                None => tokio::select! {
                    msg = self.receiver.recv() => match msg {
                        Some(msg) => msg,
                        None => {
                            // The world let go of this chunk without an eviction.
                            self.save().await;
                            self.release().await;
                            break;
                        }
                    },
                    _ = tick.tick() => {
                        self.tick();
                        continue;
                    }
                    _ = idle.tick() => {
                        self.idle_check().await;
                        continue;
                    }
                },
            };
            if msg.is_work() {
                self.idle_strikes = 0;
            }
            if let Flow::Stop = self.handle(msg).await {
                break;
            }
        }
        debug!("Chunk actor {} stopped", self.pos);
    }

    async fn handle(&mut self, msg: ChunkMessage) -> Flow {
        match msg {
            ChunkMessage::Snapshot(reply) => self.serve_snapshots(reply).await,
            ChunkMessage::WatcherJoin(watcher) => {
                for entity in self.entities.values() {
                    if entity.id != watcher.id {
                        watcher.notify(WorldEvent::EntitySpawn(entity.clone()));
                    }
                }
                self.watchers.insert(watcher.id, watcher);
            }
            ChunkMessage::WatcherLeave(id) => {
                self.watchers.remove(&id);
            }
            ChunkMessage::EntityJoin(entity) => {
                self.notify(Some(entity.id), WorldEvent::EntitySpawn(entity.clone()));
                self.entities.insert(entity.id, entity);
            }
            ChunkMessage::EntityLeave(id) => {
                if self.entities.remove(&id).is_some() {
                    self.notify(Some(id), WorldEvent::EntityDespawn(id));
                }
            }
            ChunkMessage::Entities(reply) => {
                let _ = reply.send(self.entities.values().cloned().collect());
            }
            ChunkMessage::Broadcast { except, payload } => {
                self.notify(
                    except,
                    WorldEvent::Message {
                        from: except,
                        payload,
                    },
                );
            }
            ChunkMessage::Callback(callback) => {
                callback(&mut self.chunk);
                self.broadcast_changes();
            }
            ChunkMessage::Save { world_age, reply } => {
                if self.chunk.is_dirty() {
                    self.chunk.last_update = world_age;
                }
                self.save().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            ChunkMessage::ConfirmEvict(reply) => {
                if !self.evictable() {
                    let _ = reply.send(false);
                    return Flow::Continue;
                }
                self.save().await;
                if !self.evictable() || self.chunk.is_dirty() {
                    let _ = reply.send(false);
                    return Flow::Continue;
                }
                // Nothing is queued and the world is waiting on this answer, so no request can
                // slip in between.
                self.receiver.close();
                self.release().await;
                let _ = reply.send(true);
                info!("Evicted chunk {}", self.pos);
                return Flow::Stop;
            }
            ChunkMessage::Shutdown(reply) => {
                self.save().await;
                self.release().await;
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn evictable(&self) -> bool {
        self.idle_strikes >= 2
            && self.watchers.is_empty()
            && self.deferred.is_empty()
            && self.receiver.is_empty()
    }

    /// Answers the given request and every other snapshot request already waiting in the
    /// mailbox with one snapshot. Other messages keep their order.
    async fn serve_snapshots(&mut self, first: oneshot::Sender<ChunkSnapshot>) {
        let mut requesters = vec![first];
        while let Ok(msg) = self.receiver.try_recv() {
            self.deferred.push_back(msg);
        }
        let mut rest = VecDeque::with_capacity(self.deferred.len());
        for msg in self.deferred.drain(..) {
            match msg {
                ChunkMessage::Snapshot(reply) => requesters.push(reply),
                other => rest.push_back(other),
            }
        }
        self.deferred = rest;

        requesters.retain(|reply| !reply.is_closed());
        if requesters.is_empty() {
            trace!("All snapshot requests for {} were withdrawn", self.pos);
            return;
        }
        let Some(snapshot) = self.snapshot().await else {
            return;
        };
        trace!(
            "Serving {} snapshot requests for {}",
            requesters.len(),
            self.pos
        );
        for reply in requesters {
            let _ = reply.send(snapshot.clone());
        }
    }

    async fn snapshot(&mut self) -> Option<ChunkSnapshot> {
        if self.chunk.needs_relight() {
            self.chunk.relight();
        }
        if let Some(snapshot) = &self.snapshot {
            if snapshot.version() == self.chunk.version() {
                return Some(snapshot.clone());
            }
        }
        match ChunkSnapshot::encode(&self.chunk).await {
            Ok(snapshot) => {
                self.snapshot = Some(snapshot.clone());
                Some(snapshot)
            }
            Err(e) => {
                error!("Couldn't encode chunk {}: {}", self.pos, e);
                None
            }
        }
    }

    /// Sends an event to every watcher but `except`, forgetting watchers that went away.
    fn notify(&mut self, except: Option<Uuid>, event: WorldEvent) {
        self.watchers
            .retain(|id, watcher| Some(*id) == except || watcher.notify(event.clone()));
    }

    fn broadcast_changes(&mut self) {
        let changes = self.chunk.take_changes();
        if changes.is_empty() || self.watchers.is_empty() {
            return;
        }
        let base_x = self.pos.x * SECTION_EDGE as i32;
        let base_z = self.pos.z * SECTION_EDGE as i32;
        for local in changes {
            let event = WorldEvent::BlockChange {
                pos: BlockPos::new(
                    base_x + local.x as i32,
                    local.y as i32,
                    base_z + local.z as i32,
                ),
                block: self.chunk.get_block(local),
                meta: self.chunk.get_meta(local),
            };
            self.notify(None, event);
        }
    }

    fn tick(&mut self) {
        if self.chunk.needs_relight() {
            let queued = self.chunk.light_work.len();
            let processed = self.chunk.relight();
            trace!(
                "Tick relit {} with {} operations ({} queued)",
                self.pos,
                processed,
                queued
            );
        }
        if !self.watchers.is_empty() {
            self.chunk.inhabited_time += 1;
        }
    }

    async fn idle_check(&mut self) {
        if !self.watchers.is_empty() || !self.receiver.is_empty() || !self.deferred.is_empty() {
            self.idle_strikes = 0;
            return;
        }
        self.idle_strikes = self.idle_strikes.saturating_add(1);
        if self.idle_strikes == 1 {
            self.save().await;
            return;
        }
        let Some(world) = self.context.world.upgrade() else {
            return;
        };
        // Never wait on the world: it may be waiting on this chunk.
        let proposal = WorldMessage::ChunkIdle {
            pos: self.pos,
            generation: self.generation,
        };
        if world.try_send(proposal).is_err() {
            trace!("World is busy, chunk {} stays loaded for now", self.pos);
        }
    }

    /// Persists the chunk if it changed. A fatal error leaves the chunk's data in an unknown
    /// state, so the actor gives up; anything else keeps the chunk dirty for the next attempt.
    async fn save(&mut self) {
        if !self.chunk.is_dirty() {
            return;
        }
        if self.chunk.needs_relight() {
            self.chunk.relight();
        }
        match self.region.save(&self.chunk).await {
            Ok(()) => {
                self.chunk.mark_saved();
                debug!("Saved chunk {}", self.pos);
            }
            Err(e) if e.is_fatal() => {
                error!("Couldn't save chunk {}: {}", self.pos, e);
                panic!("Couldn't save chunk {}: {}", self.pos, e);
            }
            Err(e) => warn!("Couldn't save chunk {}, will retry: {}", self.pos, e),
        }
    }

    async fn release(&mut self) {
        self.context
            .regions
            .release(RegionPos::containing(self.pos))
            .await;
    }
}

#[derive(Clone)]
pub(crate) struct ChunkActorHandle {
    sender: Sender<ChunkMessage>,
}

impl ChunkActorHandle {
    pub(crate) fn new(pos: ChunkPos, generation: u64, context: ChunkContext) -> Self {
        let (sender, receiver) = mpsc::channel(context.config.mailbox_size);
        tokio::spawn(async move {
            if let Some(mut actor) = ChunkActor::start(receiver, pos, generation, context).await {
                actor.run().await;
            }
        });
        Self { sender }
    }

    pub(crate) async fn send(&self, msg: ChunkMessage) -> Result<(), SendError<ChunkMessage>> {
        self.sender.send(msg).await
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Waits at most `timeout` for a reply; giving up drops the receiver, which withdraws the request.
pub(crate) async fn recv_timeout<T>(
    reply: oneshot::Receiver<T>,
    timeout: Duration,
) -> Result<T, crate::err::WorldError> {
    match tokio::time::timeout(timeout, reply).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(crate::err::WorldError::Timeout),
    }
}
