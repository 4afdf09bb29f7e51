use std::io::{Read, Write};

use async_nbt::{NbtCompound, NbtList, NbtTag};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::chunk::{Chunk, ChunkPos, NibbleArray, Subsection, COLUMN_COUNT, SECTION_COUNT};
use crate::err::WorldError;
use crate::protocol_types::traits::{ReadProt, WriteProt};

pub const COMPRESSION_GZIP: u8 = 1;
pub const COMPRESSION_ZLIB: u8 = 2;

fn nbt_err<E: std::fmt::Debug>(field: &str) -> impl FnOnce(E) -> WorldError + '_ {
    move |e| WorldError::Nbt(format!("{field}: {e:?}"))
}

fn to_nbt_bytes(bytes: &[u8]) -> NbtTag {
    NbtTag::ByteArray(bytes.iter().map(|b| *b as i8).collect())
}

fn from_nbt_bytes(bytes: &[i8]) -> Vec<u8> {
    bytes.iter().map(|b| *b as u8).collect()
}

fn section_to_nbt(index: usize, section: &Subsection) -> NbtCompound {
    let mut compound = NbtCompound::new();
    compound.insert("Y", NbtTag::Byte(index as i8));
    compound.insert("Blocks", to_nbt_bytes(section.blocks()));
    compound.insert("Data", to_nbt_bytes(section.meta().as_bytes()));
    compound.insert("BlockLight", to_nbt_bytes(section.block_light().as_bytes()));
    compound.insert("SkyLight", to_nbt_bytes(section.sky_light().as_bytes()));
    compound
}

/**
 * Builds the persisted compound record for a chunk. Everything lives below a `Level` compound.
 */
pub(crate) fn chunk_to_nbt(chunk: &Chunk) -> NbtCompound {
    let mut level = NbtCompound::new();
    level.insert("xPos", NbtTag::Int(chunk.pos().x));
    level.insert("zPos", NbtTag::Int(chunk.pos().z));
    level.insert("LastUpdate", NbtTag::Long(chunk.last_update));
    level.insert("TerrainPopulated", NbtTag::Byte(chunk.terrain_populated as i8));
    level.insert("InhabitedTime", NbtTag::Long(chunk.inhabited_time));
    level.insert("Biomes", to_nbt_bytes(chunk.biomes()));
    level.insert(
        "HeightMap",
        NbtTag::IntArray(chunk.heightmap().iter().map(|h| *h as i32).collect()),
    );
    level.insert("Entities", NbtTag::List(chunk.entities.clone()));
    level.insert("TileEntities", NbtTag::List(chunk.tile_entities.clone()));

    let mut sections = NbtList::new();
    for index in 0..SECTION_COUNT {
        if let Some(section) = chunk.section(index) {
            sections.push(NbtTag::Compound(section_to_nbt(index, section)));
        }
    }
    level.insert("Sections", NbtTag::List(sections));

    let mut root = NbtCompound::new();
    root.insert("Level", NbtTag::Compound(level));
    root
}

fn nibbles(section: &NbtCompound, field: &str) -> Result<NibbleArray, WorldError> {
    let bytes = section.get::<_, &[i8]>(field).map_err(nbt_err(field))?;
    NibbleArray::from_bytes(&from_nbt_bytes(bytes))
        .ok_or_else(|| WorldError::Corrupt(format!("{field} has {} bytes", bytes.len())))
}

fn section_from_nbt(section: &NbtCompound) -> Result<(usize, Subsection), WorldError> {
    let y = section.get::<_, i8>("Y").map_err(nbt_err("Y"))?;
    if !(0..SECTION_COUNT as i8).contains(&y) {
        return Err(WorldError::Corrupt(format!("Subsection index {y} out of range")));
    }
    let blocks = section.get::<_, &[i8]>("Blocks").map_err(nbt_err("Blocks"))?;
    let subsection = Subsection::from_parts(
        &from_nbt_bytes(blocks),
        nibbles(section, "Data")?,
        nibbles(section, "BlockLight")?,
        nibbles(section, "SkyLight")?,
    )
    .ok_or_else(|| WorldError::Corrupt(format!("Blocks has {} bytes", blocks.len())))?;
    Ok((y as usize, subsection))
}

/**
 * Rebuilds a chunk from its persisted compound record. Missing bookkeeping fields fall back to
 * their defaults; missing or malformed block data is a corrupted chunk.
 */
pub(crate) fn chunk_from_nbt(expected: ChunkPos, root: &NbtCompound) -> Result<Chunk, WorldError> {
    let level = root
        .get::<_, &NbtCompound>("Level")
        .map_err(nbt_err("Level"))?;
    let pos = ChunkPos::new(
        level.get::<_, i32>("xPos").map_err(nbt_err("xPos"))?,
        level.get::<_, i32>("zPos").map_err(nbt_err("zPos"))?,
    );
    if pos != expected {
        return Err(WorldError::Corrupt(format!(
            "Expected chunk {expected} but found {pos}"
        )));
    }

    let biomes = level.get::<_, &[i8]>("Biomes").map_err(nbt_err("Biomes"))?;
    let biomes: [u8; COLUMN_COUNT] = from_nbt_bytes(biomes)
        .try_into()
        .map_err(|_| WorldError::Corrupt(format!("Biomes has {} entries", biomes.len())))?;

    let heights = level.get::<_, &[i32]>("HeightMap").map_err(nbt_err("HeightMap"))?;
    if heights.len() != COLUMN_COUNT {
        return Err(WorldError::Corrupt(format!(
            "HeightMap has {} entries",
            heights.len()
        )));
    }
    let mut heightmap = [0u16; COLUMN_COUNT];
    for (slot, height) in heightmap.iter_mut().zip(heights) {
        *slot = (*height).clamp(0, 256) as u16;
    }

    let mut sections: [Option<Box<Subsection>>; SECTION_COUNT] = Default::default();
    let list = level.get::<_, &NbtList>("Sections").map_err(nbt_err("Sections"))?;
    for tag in list.iter() {
        let NbtTag::Compound(section) = tag else {
            return Err(WorldError::Corrupt("Subsection is not a compound".into()));
        };
        let (index, subsection) = section_from_nbt(section)?;
        sections[index] = Some(Box::new(subsection));
    }

    let mut chunk = Chunk::from_parts(pos, sections, biomes, heightmap);
    chunk.last_update = level.get::<_, i64>("LastUpdate").unwrap_or(0);
    chunk.terrain_populated = level
        .get::<_, i8>("TerrainPopulated")
        .map(|v| v != 0)
        .unwrap_or(false);
    chunk.inhabited_time = level.get::<_, i64>("InhabitedTime").unwrap_or(0);
    chunk.entities = level
        .get::<_, &NbtList>("Entities")
        .map(|l| l.clone())
        .unwrap_or_else(|_| NbtList::new());
    chunk.tile_entities = level
        .get::<_, &NbtList>("TileEntities")
        .map(|l| l.clone())
        .unwrap_or_else(|_| NbtList::new());
    Ok(chunk)
}

/// Serializes and zlib-compresses a chunk for the region file.
pub(crate) async fn encode(chunk: &Chunk) -> Result<Vec<u8>, WorldError> {
    let mut raw = vec![];
    chunk_to_nbt(chunk)
        .write(&mut raw)
        .await
        .map_err(WorldError::Nbt)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

pub(crate) fn decompress(scheme: u8, payload: &[u8]) -> Result<Vec<u8>, WorldError> {
    let mut raw = vec![];
    let result = match scheme {
        COMPRESSION_GZIP => GzDecoder::new(payload).read_to_end(&mut raw),
        COMPRESSION_ZLIB => ZlibDecoder::new(payload).read_to_end(&mut raw),
        other => return Err(WorldError::UnsupportedCompression(other)),
    };
    result.map_err(|e| WorldError::Corrupt(format!("Couldn't decompress chunk: {e}")))?;
    Ok(raw)
}

/// Inverse of [`encode`], accepting either compression scheme.
pub(crate) async fn decode(
    expected: ChunkPos,
    scheme: u8,
    payload: &[u8],
) -> Result<Chunk, WorldError> {
    let raw = decompress(scheme, payload)?;
    let root = NbtCompound::read(&mut raw.as_slice())
        .await
        .map_err(WorldError::Nbt)?;
    chunk_from_nbt(expected, &root)
}
