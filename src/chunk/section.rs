use crate::block::{BlockId, AIR};
use crate::chunk::nibble::NibbleArray;
use crate::chunk::SECTION_BLOCKS;

/// One 16x16x16 slice of a chunk. All arrays are always fully allocated.
#[derive(Clone)]
pub struct Subsection {
    blocks: Box<[BlockId; SECTION_BLOCKS]>,
    pub(crate) meta: NibbleArray,
    pub(crate) block_light: NibbleArray,
    pub(crate) sky_light: NibbleArray,
    block_count: u16,
}

impl Subsection {
    pub(crate) fn new() -> Self {
        Self {
            blocks: Box::new([AIR; SECTION_BLOCKS]),
            meta: NibbleArray::new(),
            block_light: NibbleArray::new(),
            sky_light: NibbleArray::new(),
            block_count: 0,
        }
    }

    /// Rebuilds a subsection from persisted arrays, recounting non-air blocks.
    pub(crate) fn from_parts(
        blocks: &[u8],
        meta: NibbleArray,
        block_light: NibbleArray,
        sky_light: NibbleArray,
    ) -> Option<Self> {
        let blocks: [BlockId; SECTION_BLOCKS] = blocks.try_into().ok()?;
        let block_count = blocks.iter().filter(|b| **b != AIR).count() as u16;
        Some(Self {
            blocks: Box::new(blocks),
            meta,
            block_light,
            sky_light,
            block_count,
        })
    }

    pub fn block(&self, index: usize) -> BlockId {
        self.blocks[index]
    }

    /// Sets a block and returns the previous one, keeping the non-air counter exact.
    pub(crate) fn set_block(&mut self, index: usize, block: BlockId) -> BlockId {
        let old = std::mem::replace(&mut self.blocks[index], block);
        if old == AIR && block != AIR {
            self.block_count += 1;
        } else if old != AIR && block == AIR {
            self.block_count -= 1;
        }
        old
    }

    pub fn block_count(&self) -> u16 {
        self.block_count
    }

    pub fn blocks(&self) -> &[u8] {
        &self.blocks[..]
    }

    pub fn meta(&self) -> &NibbleArray {
        &self.meta
    }

    pub fn block_light(&self) -> &NibbleArray {
        &self.block_light
    }

    pub fn sky_light(&self) -> &NibbleArray {
        &self.sky_light
    }
}
