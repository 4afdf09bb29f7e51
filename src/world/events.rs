use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::block::BlockId;
use crate::chunk::{BlockPos, ChunkPos};

const WATCHER_BUFFER: usize = 256;

/// An entity as far as the world core cares: who it is, what it is and where it stands.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityInfo {
    pub id: Uuid,
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl EntityInfo {
    pub fn new(id: Uuid, kind: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            id,
            kind: kind.into(),
            x,
            y,
            z,
        }
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::containing(self.x.floor() as i32, self.z.floor() as i32)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorldEvent {
    EntitySpawn(EntityInfo),
    EntityDespawn(Uuid),
    BlockChange {
        pos: BlockPos,
        block: BlockId,
        meta: u8,
    },
    /// Opaque payload broadcast by another watcher, e.g. chat or movement.
    Message { from: Option<Uuid>, payload: Arc<[u8]> },
    TimeUpdate { world_age: i64, day_time: i64 },
}

/// A subscriber to chunk or world events, typically a connected player.
#[derive(Clone, Debug)]
pub struct Watcher {
    pub id: Uuid,
    events: mpsc::Sender<WorldEvent>,
}

impl Watcher {
    pub fn new(id: Uuid) -> (Self, mpsc::Receiver<WorldEvent>) {
        let (events, receiver) = mpsc::channel(WATCHER_BUFFER);
        (Self { id, events }, receiver)
    }

    /**
     * Hands an event to the watcher without waiting. Returns false once the watcher has gone away;
     * a watcher that can't keep up loses the event.
     */
    pub(crate) fn notify(&self, event: WorldEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Watcher {} is lagging behind, dropping an event", self.id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
