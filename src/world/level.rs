use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_nbt::{NbtCompound, NbtTag};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::fs;

use crate::err::WorldError;
use crate::protocol_types::traits::{ReadProt, WriteProt};

pub const LEVEL_FILE: &str = "level.dat";
pub const DAY_LENGTH: i64 = 24000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorldTime {
    /// Ticks since the world was created.
    pub world_age: i64,
    /// Time of day, wrapping at [`DAY_LENGTH`].
    pub day_time: i64,
}

impl WorldTime {
    pub fn tick(&mut self) {
        self.world_age += 1;
        self.day_time = (self.day_time + 1).rem_euclid(DAY_LENGTH);
    }
}

/// Settings persisted in the world's level file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelData {
    pub name: String,
    pub spawn: (i32, i32, i32),
    pub time: WorldTime,
}

impl LevelData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawn: (0, 64, 0),
            time: WorldTime::default(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(LEVEL_FILE)
    }

    fn to_nbt(&self) -> NbtCompound {
        let mut data = NbtCompound::new();
        data.insert("LevelName", NbtTag::String(self.name.clone()));
        data.insert("SpawnX", NbtTag::Int(self.spawn.0));
        data.insert("SpawnY", NbtTag::Int(self.spawn.1));
        data.insert("SpawnZ", NbtTag::Int(self.spawn.2));
        data.insert("Time", NbtTag::Long(self.time.world_age));
        data.insert("DayTime", NbtTag::Long(self.time.day_time));
        let mut root = NbtCompound::new();
        root.insert("Data", NbtTag::Compound(data));
        root
    }

    fn from_nbt(root: &NbtCompound, fallback_name: &str) -> Result<Self, WorldError> {
        let data = root
            .get::<_, &NbtCompound>("Data")
            .map_err(|e| WorldError::Nbt(format!("Data: {:?}", e)))?;
        let int = |name: &str, default: i32| data.get::<_, i32>(name).unwrap_or(default);
        let long = |name: &str| data.get::<_, i64>(name).unwrap_or(0);
        Ok(Self {
            name: data
                .get::<_, &str>("LevelName")
                .map(String::from)
                .unwrap_or_else(|_| fallback_name.to_string()),
            spawn: (int("SpawnX", 0), int("SpawnY", 64), int("SpawnZ", 0)),
            time: WorldTime {
                world_age: long("Time"),
                day_time: long("DayTime").rem_euclid(DAY_LENGTH),
            },
        })
    }

    /// Reads the level file of a world directory. `Ok(None)` if the world has none yet.
    pub async fn load(dir: &Path, fallback_name: &str) -> Result<Option<Self>, WorldError> {
        let bytes = match fs::read(Self::path(dir)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut raw = vec![];
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| WorldError::Corrupt(format!("Couldn't decompress level file: {e}")))?;
        let root = NbtCompound::read(&mut raw.as_slice())
            .await
            .map_err(WorldError::Nbt)?;
        Self::from_nbt(&root, fallback_name).map(Some)
    }

    /// Writes the level file next to the old one and swaps it in.
    pub async fn save(&self, dir: &Path) -> Result<(), WorldError> {
        let mut raw = vec![];
        self.to_nbt().write(&mut raw).await.map_err(WorldError::Nbt)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let compressed = encoder.finish()?;

        let path = Self::path(dir);
        let staging = path.with_extension("dat_new");
        fs::write(&staging, compressed).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }
}
