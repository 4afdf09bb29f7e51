use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::chunk::ChunkPos;
use crate::err::WorldError;
use crate::region::{Region, RegionPos};

/// The open regions of one world, counted by the chunk actors using them.
///
/// A region is opened by the first chunk that needs it and closed when the last one releases it.
pub struct RegionManager {
    dir: PathBuf,
    ext: String,
    regions: Mutex<HashMap<RegionPos, (Arc<Region>, usize)>>,
}

impl RegionManager {
    pub fn new(dir: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ext: ext.into(),
            regions: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn acquire(&self, chunk: ChunkPos) -> Result<Arc<Region>, WorldError> {
        let pos = RegionPos::containing(chunk);
        let mut regions = self.regions.lock().await;
        if let Some((region, users)) = regions.get_mut(&pos) {
            *users += 1;
            return Ok(region.clone());
        }
        let region = Arc::new(Region::open(&self.dir, pos, &self.ext).await?);
        regions.insert(pos, (region.clone(), 1));
        Ok(region)
    }

    pub async fn release(&self, pos: RegionPos) {
        let mut regions = self.regions.lock().await;
        let Some((_, users)) = regions.get_mut(&pos) else {
            return;
        };
        *users -= 1;
        if *users == 0 {
            regions.remove(&pos);
            debug!("Closed region {:?}", pos);
        }
    }

    /// Number of chunk actors currently holding the region, 0 if it isn't open.
    pub async fn users(&self, pos: RegionPos) -> usize {
        self.regions
            .lock()
            .await
            .get(&pos)
            .map(|(_, users)| *users)
            .unwrap_or(0)
    }

    pub async fn open_regions(&self) -> usize {
        self.regions.lock().await.len()
    }
}
