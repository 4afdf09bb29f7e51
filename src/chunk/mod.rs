use std::fmt::{Display, Formatter};

use crate::err::WorldError;

pub(crate) mod actor;
mod column;
mod light;
mod nibble;
mod section;
pub mod snapshot;

pub use column::Chunk;
pub use nibble::NibbleArray;
pub use section::Subsection;

pub const SECTION_EDGE: usize = 16;
pub const SECTION_COUNT: usize = 16;
pub const SECTION_BLOCKS: usize = SECTION_EDGE * SECTION_EDGE * SECTION_EDGE;
pub const CHUNK_HEIGHT: usize = SECTION_EDGE * SECTION_COUNT;
pub const COLUMN_COUNT: usize = SECTION_EDGE * SECTION_EDGE;

/// Chunk coordinates, i.e. block coordinates divided by 16 (floored).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk containing the given block column.
    pub fn containing(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(SECTION_EDGE as i32),
            z: block_z.div_euclid(SECTION_EDGE as i32),
        }
    }
}

impl Display for ChunkPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// A block position relative to its chunk: x and z in [0, 16), y in [0, 256).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalPos {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl LocalPos {
    pub fn new(x: u8, y: u8, z: u8) -> Self {
        debug_assert!((x as usize) < SECTION_EDGE && (z as usize) < SECTION_EDGE);
        Self { x, y, z }
    }

    pub(crate) fn packed(self) -> u16 {
        (self.y as u16) << 8 | (self.z as u16) << 4 | self.x as u16
    }

    #[cfg(test)]
    pub(crate) fn from_packed(packed: u16) -> Self {
        Self {
            x: (packed & 0xf) as u8,
            z: (packed >> 4 & 0xf) as u8,
            y: (packed >> 8) as u8,
        }
    }

    pub(crate) fn section(self) -> usize {
        self.y as usize >> 4
    }

    /// Index into a subsection's 4096-entry arrays.
    pub(crate) fn section_index(self) -> usize {
        ((self.y as usize & 0xf) << 8) | (self.z as usize) << 4 | self.x as usize
    }

    pub(crate) fn column(self) -> usize {
        (self.z as usize) << 4 | self.x as usize
    }

    /// The 6-connected neighbors that lie inside the chunk.
    pub(crate) fn neighbors(self) -> impl Iterator<Item = LocalPos> {
        const OFFSETS: [(i16, i16, i16); 6] = [
            (1, 0, 0),
            (-1, 0, 0),
            (0, 1, 0),
            (0, -1, 0),
            (0, 0, 1),
            (0, 0, -1),
        ];
        OFFSETS.into_iter().filter_map(move |(dx, dy, dz)| {
            let x = self.x as i16 + dx;
            let y = self.y as i16 + dy;
            let z = self.z as i16 + dz;
            if (0..SECTION_EDGE as i16).contains(&x)
                && (0..CHUNK_HEIGHT as i16).contains(&y)
                && (0..SECTION_EDGE as i16).contains(&z)
            {
                Some(LocalPos::new(x as u8, y as u8, z as u8))
            } else {
                None
            }
        })
    }
}

/// Absolute block coordinates in a world.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn chunk(self) -> ChunkPos {
        ChunkPos::containing(self.x, self.z)
    }

    /// Splits the position into its chunk and the position inside that chunk.
    pub fn split(self) -> Result<(ChunkPos, LocalPos), WorldError> {
        if !(0..CHUNK_HEIGHT as i32).contains(&self.y) {
            return Err(WorldError::OutOfBounds {
                x: self.x,
                y: self.y,
                z: self.z,
            });
        }
        let local = LocalPos::new(
            self.x.rem_euclid(SECTION_EDGE as i32) as u8,
            self.y as u8,
            self.z.rem_euclid(SECTION_EDGE as i32) as u8,
        );
        Ok((self.chunk(), local))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn negative_block_coordinates_floor() {
        let (chunk, local) = BlockPos::new(-1, 70, -17).split().unwrap();
        assert_eq!(chunk, ChunkPos::new(-1, -2));
        assert_eq!(local, LocalPos::new(15, 70, 15));
    }

    #[test]
    fn out_of_range_height_is_rejected() {
        assert!(BlockPos::new(0, 256, 0).split().is_err());
        assert!(BlockPos::new(0, -1, 0).split().is_err());
    }

    #[test]
    fn packed_round_trip() {
        let pos = LocalPos::new(3, 200, 9);
        assert_eq!(LocalPos::from_packed(pos.packed()), pos);
        assert_eq!(pos.section(), 12);
        assert_eq!(pos.section_index(), (8 << 8) | (9 << 4) | 3);
    }

    #[test]
    fn neighbors_stay_inside_chunk() {
        assert_eq!(LocalPos::new(0, 0, 0).neighbors().count(), 3);
        assert_eq!(LocalPos::new(5, 100, 5).neighbors().count(), 6);
        assert_eq!(LocalPos::new(15, 255, 15).neighbors().count(), 3);
    }
}
