//! Sector-addressed region files holding 32x32 chunks each.
//!
//! Layout: two header sectors (1024 big-endian `offset << 8 | count` entries, then 1024
//! timestamps), followed by 4096-byte data sectors. Every chunk record starts with a 4-byte
//! length (counting the compression byte) and a 1-byte compression scheme.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bitvec::prelude::*;
use log::{debug, warn};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use crate::chunk::{Chunk, ChunkPos};
use crate::err::WorldError;

pub(crate) mod codec;
mod manager;

pub use manager::RegionManager;

pub const SECTOR_BYTES: usize = 4096;
pub const REGION_EDGE: i32 = 32;
const HEADER_SECTORS: usize = 2;
const SLOT_COUNT: usize = (REGION_EDGE * REGION_EDGE) as usize;
const MAX_SECTOR_COUNT: usize = u8::MAX as usize;
/// Largest offset the 3-byte location field can hold.
const MAX_SECTOR_OFFSET: usize = (1 << 24) - 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn containing(chunk: ChunkPos) -> Self {
        Self {
            x: chunk.x.div_euclid(REGION_EDGE),
            z: chunk.z.div_euclid(REGION_EDGE),
        }
    }

    pub fn file_name(&self, ext: &str) -> String {
        format!("r.{}.{}.{}", self.x, self.z, ext)
    }
}

/// Header slot of a chunk inside its region.
fn slot(chunk: ChunkPos) -> usize {
    (chunk.x.rem_euclid(REGION_EDGE) | chunk.z.rem_euclid(REGION_EDGE) * REGION_EDGE) as usize
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct SlotEntry {
    offset: usize,
    count: usize,
}

impl SlotEntry {
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.count
    }
}

/// Which sectors are in use and where every chunk lives.
struct SectorTable {
    entries: [SlotEntry; SLOT_COUNT],
    used: BitVec,
}

impl SectorTable {
    fn new() -> Self {
        Self {
            entries: [SlotEntry::default(); SLOT_COUNT],
            used: bitvec![1; HEADER_SECTORS],
        }
    }

    /// Parses the location header. Entries pointing into the header, past the end of the file
    /// or into sectors already claimed by another slot are dropped.
    fn from_header(pos: RegionPos, header: &[u8], file_sectors: usize) -> Self {
        let mut table = Self::new();
        table.used.resize(file_sectors.max(HEADER_SECTORS), false);
        for (slot, raw) in header.chunks_exact(4).take(SLOT_COUNT).enumerate() {
            let value = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let entry = SlotEntry {
                offset: (value >> 8) as usize,
                count: (value & 0xff) as usize,
            };
            if entry.count == 0 {
                continue;
            }
            if entry.offset < HEADER_SECTORS
                || entry.offset + entry.count > file_sectors
                || table.used[entry.range()].any()
            {
                warn!(
                    "Region {:?}: dropping invalid entry for slot {} ({:?})",
                    pos, slot, entry
                );
                continue;
            }
            table.used[entry.range()].fill(true);
            table.entries[slot] = entry;
        }
        table
    }

    /// First-fit allocation of `count` contiguous sectors. Grows the bitmap when no free run is
    /// long enough; fails only once the start would not fit in a header entry.
    fn allocate(&mut self, count: usize) -> Result<usize, WorldError> {
        let mut run = 0;
        for sector in HEADER_SECTORS..self.used.len() {
            if self.used[sector] {
                run = 0;
                continue;
            }
            run += 1;
            if run == count {
                let start = sector + 1 - count;
                if start > MAX_SECTOR_OFFSET {
                    return Err(WorldError::RegionFull(count));
                }
                self.used[start..start + count].fill(true);
                return Ok(start);
            }
        }
        let start = self.used.len() - run;
        if start > MAX_SECTOR_OFFSET {
            return Err(WorldError::RegionFull(count));
        }
        self.used.resize(start + count, false);
        self.used[start..start + count].fill(true);
        Ok(start)
    }

    fn free(&mut self, entry: SlotEntry) {
        if entry.count > 0 {
            self.used[entry.range()].fill(false);
        }
    }
}

/// Outcome of looking a chunk up in its region.
pub enum ChunkLoad {
    Missing,
    Present(Chunk),
    /// The record exists but cannot be read back. Callers regenerate the chunk.
    Corrupt(WorldError),
}

/**
 * One open region file.
 *
 * The sector table is shared by every chunk actor of the region: loads take it for reading,
 * saves for writing. The file handle has its own lock since a seek and the following read or
 * write must not interleave with another chunk's.
 */
pub struct Region {
    pos: RegionPos,
    path: PathBuf,
    table: RwLock<SectorTable>,
    file: Mutex<File>,
}

impl Region {
    pub async fn open(dir: &Path, pos: RegionPos, ext: &str) -> Result<Self, WorldError> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(pos.file_name(ext));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;
        let len = file.metadata().await?.len() as usize;
        let header_len = HEADER_SECTORS * SECTOR_BYTES;
        let mut header = vec![0u8; header_len];
        if len > 0 {
            let readable = len.min(header_len);
            file.read_exact(&mut header[..readable]).await?;
        }
        if len < header_len {
            // New (or truncated) file: make sure the header area exists on disk.
            file.set_len(header_len as u64).await?;
        }
        let file_sectors = len.max(header_len).div_ceil(SECTOR_BYTES);
        let table = SectorTable::from_header(pos, &header[..SECTOR_BYTES], file_sectors);
        debug!("Opened region {:?} at {}", pos, path.display());
        Ok(Self {
            pos,
            path,
            table: RwLock::new(table),
            file: Mutex::new(file),
        })
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, chunk: ChunkPos) -> bool {
        self.table.read().await.entries[slot(chunk)].count > 0
    }

    /// Reads the raw record of a chunk: its compression scheme and compressed payload.
    async fn read_record(&self, chunk: ChunkPos) -> Result<Option<(u8, Vec<u8>)>, WorldError> {
        let table = self.table.read().await;
        let entry = table.entries[slot(chunk)];
        if entry.count == 0 {
            return Ok(None);
        }
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start((entry.offset * SECTOR_BYTES) as u64))
            .await?;
        let mut prefix = [0u8; 5];
        file.read_exact(&mut prefix).await?;
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if length < 1 || length + 4 > entry.count * SECTOR_BYTES {
            return Err(WorldError::Corrupt(format!(
                "Record length {} doesn't fit {} sectors",
                length, entry.count
            )));
        }
        let mut payload = vec![0u8; length - 1];
        file.read_exact(&mut payload).await?;
        Ok(Some((prefix[4], payload)))
    }

    pub async fn load(&self, chunk: ChunkPos) -> ChunkLoad {
        let record = match self.read_record(chunk).await {
            Ok(Some(record)) => record,
            Ok(None) => return ChunkLoad::Missing,
            Err(WorldError::Io(e)) => {
                return ChunkLoad::Corrupt(WorldError::Corrupt(format!("Truncated read: {e}")))
            }
            Err(e) => return ChunkLoad::Corrupt(e),
        };
        match codec::decode(chunk, record.0, &record.1).await {
            Ok(chunk) => ChunkLoad::Present(chunk),
            Err(e) => ChunkLoad::Corrupt(e),
        }
    }

    /**
     * Writes a chunk into freshly allocated sectors. The old sectors stay reserved until the new
     * record is synced and the header points at it.
     */
    pub async fn save(&self, chunk: &Chunk) -> Result<(), WorldError> {
        let payload = codec::encode(chunk).await?;
        let length = payload.len() + 1;
        let count = (length + 4).div_ceil(SECTOR_BYTES);
        if count > MAX_SECTOR_COUNT {
            return Err(WorldError::ChunkTooLarge(length));
        }

        let mut record = Vec::with_capacity(count * SECTOR_BYTES);
        record.extend_from_slice(&(length as u32).to_be_bytes());
        record.push(codec::COMPRESSION_ZLIB);
        record.extend_from_slice(&payload);
        record.resize(count * SECTOR_BYTES, 0);

        let slot = slot(chunk.pos());
        let mut table = self.table.write().await;
        let old = table.entries[slot];
        let offset = table.allocate(count)?;
        let entry = SlotEntry { offset, count };

        let written = self.write_record(slot, entry, &record).await;
        if let Err(e) = written {
            table.free(entry);
            return Err(e);
        }
        table.free(old);
        table.entries[slot] = entry;
        Ok(())
    }

    async fn write_record(
        &self,
        slot: usize,
        entry: SlotEntry,
        record: &[u8],
    ) -> Result<(), WorldError> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start((entry.offset * SECTOR_BYTES) as u64))
            .await?;
        file.write_all(record).await?;
        file.flush().await?;
        file.sync_data().await?;

        let location = ((entry.offset as u32) << 8 | entry.count as u32).to_be_bytes();
        file.seek(SeekFrom::Start((slot * 4) as u64)).await?;
        file.write_all(&location).await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        file.seek(SeekFrom::Start((SECTOR_BYTES + slot * 4) as u64))
            .await?;
        file.write_all(&timestamp.to_be_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Sector ranges of every stored chunk, by slot.
    pub async fn allocations(&self) -> Vec<(usize, std::ops::Range<usize>)> {
        let table = self.table.read().await;
        table
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.count > 0)
            .map(|(slot, e)| (slot, e.range()))
            .collect()
    }
}
