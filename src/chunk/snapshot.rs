use std::io::{Read, Write};
use std::sync::Arc;

use chunkworld_derive::{ReadProt, SizedProt, WriteProt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::chunk::{Chunk, COLUMN_COUNT, SECTION_BLOCKS, SECTION_COUNT};
use crate::err::WorldError;
use crate::protocol_types::primitives::{PrefixedBytes, VarInt};
use crate::protocol_types::traits::{ReadProt, SizedProt, WriteProt};

pub const CHUNK_DATA_TAG: u8 = 0x33;

const NIBBLE_BYTES: usize = SECTION_BLOCKS / 2;

#[derive(Debug, SizedProt, WriteProt, ReadProt)]
struct ChunkDataPacket {
    tag: u8,
    x: i32,
    z: i32,
    ground_up: bool,
    primary_mask: u16,
    reserved: u16,
    data: PrefixedBytes,
}

/// A compressed, framed copy of a whole chunk ready to be written to a client.
///
/// Cheap to clone, so one snapshot can be handed to every requester of a burst.
#[derive(Clone, Debug)]
pub struct ChunkSnapshot {
    bytes: Arc<Vec<u8>>,
    version: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DecodedSection {
    pub index: usize,
    pub blocks: Vec<u8>,
    pub meta: Vec<u8>,
    pub block_light: Vec<u8>,
    pub sky_light: Vec<u8>,
}

#[derive(Debug)]
pub struct DecodedChunk {
    pub x: i32,
    pub z: i32,
    pub ground_up: bool,
    pub primary_mask: u16,
    pub sections: Vec<DecodedSection>,
    pub biomes: Vec<u8>,
}

impl ChunkSnapshot {
    pub(crate) async fn encode(chunk: &Chunk) -> Result<Self, WorldError> {
        let mask = chunk.section_mask();
        let present: Vec<_> = (0..SECTION_COUNT)
            .filter_map(|i| chunk.section(i))
            .collect();

        // Order is fixed: every block array, then meta, block light, sky light, then biomes.
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        for section in &present {
            encoder.write_all(section.blocks())?;
        }
        for section in &present {
            encoder.write_all(section.meta().as_bytes())?;
        }
        for section in &present {
            encoder.write_all(section.block_light().as_bytes())?;
        }
        for section in &present {
            encoder.write_all(section.sky_light().as_bytes())?;
        }
        encoder.write_all(chunk.biomes())?;
        let data = encoder.finish()?;

        let packet = ChunkDataPacket {
            tag: CHUNK_DATA_TAG,
            x: chunk.pos().x,
            z: chunk.pos().z,
            ground_up: true,
            primary_mask: mask,
            reserved: 0,
            data: data.into(),
        };
        let mut bytes = Vec::with_capacity(packet.prot_size() + 5);
        VarInt::from(packet.prot_size()).write(&mut bytes).await?;
        packet.write(&mut bytes).await?;
        Ok(Self {
            bytes: Arc::new(bytes),
            version: chunk.version(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The chunk version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub async fn decode(&self) -> Result<DecodedChunk, WorldError> {
        let mut stream = self.bytes.as_slice();
        let length = VarInt::read(&mut stream).await?;
        if length.value as usize != stream.len() {
            return Err(WorldError::Corrupt(format!(
                "Snapshot announces {} bytes but carries {}",
                length.value,
                stream.len()
            )));
        }
        let packet = ChunkDataPacket::read(&mut stream).await?;
        if packet.tag != CHUNK_DATA_TAG {
            return Err(WorldError::Corrupt(format!(
                "Unexpected packet tag 0x{:x}",
                packet.tag
            )));
        }

        let mut raw = vec![];
        ZlibDecoder::new(packet.data.bytes.as_slice()).read_to_end(&mut raw)?;
        let count = packet.primary_mask.count_ones() as usize;
        let expected = count * (SECTION_BLOCKS + 3 * NIBBLE_BYTES) + COLUMN_COUNT;
        if raw.len() != expected {
            return Err(WorldError::Corrupt(format!(
                "Snapshot payload is {} bytes, expected {}",
                raw.len(),
                expected
            )));
        }

        let indices = (0..SECTION_COUNT).filter(|i| packet.primary_mask & (1 << i) != 0);
        let nibble_base = count * SECTION_BLOCKS;
        let nibbles = |array: usize, n: usize| {
            let start = nibble_base + (array * count + n) * NIBBLE_BYTES;
            raw[start..start + NIBBLE_BYTES].to_vec()
        };
        let sections = indices
            .enumerate()
            .map(|(n, index)| DecodedSection {
                index,
                blocks: raw[n * SECTION_BLOCKS..(n + 1) * SECTION_BLOCKS].to_vec(),
                meta: nibbles(0, n),
                block_light: nibbles(1, n),
                sky_light: nibbles(2, n),
            })
            .collect();

        Ok(DecodedChunk {
            x: packet.x,
            z: packet.z,
            ground_up: packet.ground_up,
            primary_mask: packet.primary_mask,
            sections,
            biomes: raw[raw.len() - COLUMN_COUNT..].to_vec(),
        })
    }
}
