//! Static block property table.
//!
//! The set of block types is closed, so properties are a plain array indexed by block id.
//! Chunks read it through [`BlockLookup`] so a server can substitute its own table.

pub type BlockId = u8;

pub const AIR: BlockId = 0;
pub const STONE: BlockId = 1;
pub const GRASS: BlockId = 2;
pub const DIRT: BlockId = 3;
pub const COBBLESTONE: BlockId = 4;
pub const PLANKS: BlockId = 5;
pub const BEDROCK: BlockId = 7;
pub const FLOWING_WATER: BlockId = 8;
pub const WATER: BlockId = 9;
pub const FLOWING_LAVA: BlockId = 10;
pub const LAVA: BlockId = 11;
pub const SAND: BlockId = 12;
pub const GRAVEL: BlockId = 13;
pub const LOG: BlockId = 17;
pub const LEAVES: BlockId = 18;
pub const GLASS: BlockId = 20;
pub const TORCH: BlockId = 50;
pub const FIRE: BlockId = 51;
pub const GLOWSTONE: BlockId = 89;
pub const JACK_O_LANTERN: BlockId = 91;

pub const MAX_LIGHT: u8 = 15;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockProps {
    pub name: &'static str,
    /// Light level emitted by the block itself.
    pub emission: u8,
    /// Light lost when passing through the block, on top of the regular falloff of 1.
    pub filter: u8,
    pub solid: bool,
}

impl BlockProps {
    const fn opaque(name: &'static str) -> Self {
        Self {
            name,
            emission: 0,
            filter: MAX_LIGHT,
            solid: true,
        }
    }

    const fn clear(name: &'static str, filter: u8, solid: bool) -> Self {
        Self {
            name,
            emission: 0,
            filter,
            solid,
        }
    }

    const fn glowing(name: &'static str, emission: u8, filter: u8, solid: bool) -> Self {
        Self {
            name,
            emission,
            filter,
            solid,
        }
    }

    /// Whether the block takes part in lighting at all (and therefore in the heightmap).
    pub const fn light_relevant(&self) -> bool {
        self.emission > 0 || self.filter > 0
    }
}

const fn build_table() -> [BlockProps; 256] {
    let mut table = [BlockProps::opaque("unknown"); 256];
    table[AIR as usize] = BlockProps::clear("air", 0, false);
    table[STONE as usize] = BlockProps::opaque("stone");
    table[GRASS as usize] = BlockProps::opaque("grass");
    table[DIRT as usize] = BlockProps::opaque("dirt");
    table[COBBLESTONE as usize] = BlockProps::opaque("cobblestone");
    table[PLANKS as usize] = BlockProps::opaque("planks");
    table[BEDROCK as usize] = BlockProps::opaque("bedrock");
    table[FLOWING_WATER as usize] = BlockProps::clear("flowing_water", 2, false);
    table[WATER as usize] = BlockProps::clear("water", 2, false);
    table[FLOWING_LAVA as usize] = BlockProps::glowing("flowing_lava", 15, MAX_LIGHT, false);
    table[LAVA as usize] = BlockProps::glowing("lava", 15, MAX_LIGHT, false);
    table[SAND as usize] = BlockProps::opaque("sand");
    table[GRAVEL as usize] = BlockProps::opaque("gravel");
    table[LOG as usize] = BlockProps::opaque("log");
    table[LEAVES as usize] = BlockProps::clear("leaves", 1, true);
    table[GLASS as usize] = BlockProps::clear("glass", 0, true);
    table[TORCH as usize] = BlockProps::glowing("torch", 14, 0, false);
    table[FIRE as usize] = BlockProps::glowing("fire", 15, 0, false);
    table[GLOWSTONE as usize] = BlockProps::glowing("glowstone", 15, MAX_LIGHT, true);
    table[JACK_O_LANTERN as usize] = BlockProps::glowing("jack_o_lantern", 15, MAX_LIGHT, true);
    table
}

static BLOCKS: [BlockProps; 256] = build_table();

pub fn block_props(id: BlockId) -> &'static BlockProps {
    &BLOCKS[id as usize]
}

/// Source of the properties lighting and the heightmap work with.
pub trait BlockLookup: Send + Sync {
    fn props(&self, id: BlockId) -> BlockProps;
}

/// The built-in block table.
#[derive(Copy, Clone, Debug, Default)]
pub struct StaticBlocks;

impl BlockLookup for StaticBlocks {
    fn props(&self, id: BlockId) -> BlockProps {
        *block_props(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn air_is_not_light_relevant() {
        assert!(!block_props(AIR).light_relevant());
        assert!(!block_props(GLASS).light_relevant());
        assert!(block_props(LEAVES).light_relevant());
    }

    #[test]
    fn torch_emits_and_stone_filters() {
        assert_eq!(block_props(TORCH).emission, 14);
        assert_eq!(block_props(TORCH).filter, 0);
        assert_eq!(block_props(STONE).filter, MAX_LIGHT);
        assert_eq!(block_props(STONE).emission, 0);
    }

    #[test]
    fn unknown_ids_are_opaque() {
        let props = StaticBlocks.props(250);
        assert_eq!(props.name, "unknown");
        assert!(props.solid);
        assert_eq!(props.filter, MAX_LIGHT);
    }
}
