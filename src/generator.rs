use crate::block::{BlockId, AIR, BEDROCK, DIRT, GRASS, STONE};
use crate::chunk::{Chunk, LocalPos, CHUNK_HEIGHT, SECTION_EDGE};

/// Terrain generation strategy, invoked once for every chunk that has no stored data.
pub trait Generator: Send + Sync {
    /// The block (and its metadata) at an absolute position.
    fn generate_block(&self, x: i32, y: i32, z: i32) -> (BlockId, u8);

    /// Biome for an absolute block column.
    fn biome(&self, _x: i32, _z: i32) -> u8 {
        PLAINS
    }

    /// Fills a fresh chunk. The default implementation asks `generate_block` for every position
    /// below `max_height`.
    fn generate(&self, chunk_x: i32, chunk_z: i32, chunk: &mut Chunk) {
        let base_x = chunk_x * SECTION_EDGE as i32;
        let base_z = chunk_z * SECTION_EDGE as i32;
        for z in 0..SECTION_EDGE as u8 {
            for x in 0..SECTION_EDGE as u8 {
                let (wx, wz) = (base_x + x as i32, base_z + z as i32);
                chunk.set_biome(x, z, self.biome(wx, wz));
                for y in 0..self.max_height().min(CHUNK_HEIGHT) {
                    let (block, meta) = self.generate_block(wx, y as i32, wz);
                    if block == AIR {
                        continue;
                    }
                    let pos = LocalPos::new(x, y as u8, z);
                    chunk.set_block(pos, block);
                    chunk.set_meta(pos, meta);
                }
            }
        }
        chunk.set_terrain_populated(true);
    }

    /// Upper bound (exclusive) of the heights `generate` asks about.
    fn max_height(&self) -> usize {
        CHUNK_HEIGHT
    }
}

pub const PLAINS: u8 = 1;

/// Flat layered terrain: bedrock, stone, three layers of dirt and grass on top.
///
/// Also used to replace chunks whose stored data could not be read.
#[derive(Copy, Clone, Debug)]
pub struct FlatGenerator {
    pub height: i32,
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self { height: 64 }
    }
}

impl Generator for FlatGenerator {
    fn generate_block(&self, _x: i32, y: i32, _z: i32) -> (BlockId, u8) {
        let top = self.height - 1;
        let block = match y {
            0 => BEDROCK,
            y if y < top - 3 => STONE,
            y if y < top => DIRT,
            y if y == top => GRASS,
            _ => AIR,
        };
        (block, 0)
    }

    fn max_height(&self) -> usize {
        self.height.max(0) as usize
    }
}
