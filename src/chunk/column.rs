use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_nbt::NbtList;

use crate::block::{BlockId, BlockLookup, StaticBlocks, AIR, MAX_LIGHT};
use crate::chunk::light::{LightOp, LightWork};
use crate::chunk::section::Subsection;
use crate::chunk::{ChunkPos, LocalPos, COLUMN_COUNT, SECTION_COUNT, SECTION_EDGE};

pub const DEFAULT_BIOME: u8 = 1;

/// The full 16x16x256 state of one chunk.
///
/// Mutation goes through the accessors so that block counters, the heightmap, the light source
/// map and the relight worklist stay in step with the block data.
pub struct Chunk {
    pos: ChunkPos,
    pub(crate) blocks: Arc<dyn BlockLookup>,
    sections: [Option<Box<Subsection>>; SECTION_COUNT],
    biomes: [u8; COLUMN_COUNT],
    heightmap: [u16; COLUMN_COUNT],
    /// Sparse map of packed position -> emitted light for every light source in the chunk.
    pub(crate) lights: HashMap<u16, u8>,
    pub(crate) light_work: LightWork,
    needs_relight: bool,
    pub(crate) last_update: i64,
    pub(crate) terrain_populated: bool,
    pub(crate) inhabited_time: i64,
    pub(crate) entities: NbtList,
    pub(crate) tile_entities: NbtList,
    dirty: bool,
    version: u64,
    changes: Vec<LocalPos>,
    changed: HashSet<u16>,
}

impl Chunk {
    pub fn new(pos: ChunkPos) -> Self {
        Self::with_blocks(pos, Arc::new(StaticBlocks))
    }

    /// An empty chunk whose lighting and heightmap use `blocks` for block properties.
    pub fn with_blocks(pos: ChunkPos, blocks: Arc<dyn BlockLookup>) -> Self {
        Self {
            pos,
            blocks,
            sections: Default::default(),
            biomes: [DEFAULT_BIOME; COLUMN_COUNT],
            heightmap: [0; COLUMN_COUNT],
            lights: HashMap::new(),
            light_work: LightWork::default(),
            needs_relight: false,
            last_update: 0,
            terrain_populated: false,
            inhabited_time: 0,
            entities: NbtList::new(),
            tile_entities: NbtList::new(),
            dirty: true,
            version: 0,
            changes: vec![],
            changed: HashSet::new(),
        }
    }

    /// Reassembles a chunk from persisted data. Light sources are rediscovered from the blocks;
    /// stored light values are trusted as they are.
    pub(crate) fn from_parts(
        pos: ChunkPos,
        sections: [Option<Box<Subsection>>; SECTION_COUNT],
        biomes: [u8; COLUMN_COUNT],
        heightmap: [u16; COLUMN_COUNT],
    ) -> Self {
        let mut chunk = Self::new(pos);
        chunk.sections = sections;
        chunk.biomes = biomes;
        chunk.heightmap = heightmap;
        chunk.rebuild_light_sources();
        chunk.dirty = false;
        chunk
    }

    /// Switches the property source of a loaded chunk and rediscovers its light sources.
    pub(crate) fn set_blocks(&mut self, blocks: Arc<dyn BlockLookup>) {
        self.blocks = blocks;
        self.rebuild_light_sources();
    }

    fn rebuild_light_sources(&mut self) {
        self.lights.clear();
        for (s, section) in self.sections.iter().enumerate() {
            let Some(section) = section else { continue };
            if section.block_count() == 0 {
                continue;
            }
            for (index, block) in section.blocks().iter().enumerate() {
                let emission = self.blocks.props(*block).emission;
                if emission > 0 {
                    let packed = ((s as u16) << 12) | index as u16;
                    self.lights.insert(packed, emission);
                }
            }
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn section(&self, index: usize) -> Option<&Subsection> {
        self.sections.get(index).and_then(|s| s.as_deref())
    }

    fn ensure_section(&mut self, index: usize) -> &mut Subsection {
        let heightmap = &self.heightmap;
        self.sections[index].get_or_insert_with(|| {
            let mut section = Subsection::new();
            let base = index * SECTION_EDGE;
            for y in 0..SECTION_EDGE {
                for (column, height) in heightmap.iter().enumerate() {
                    if base + y >= *height as usize {
                        section.sky_light.set(y << 8 | column, MAX_LIGHT);
                    }
                }
            }
            Box::new(section)
        })
    }

    pub fn get_block(&self, pos: LocalPos) -> BlockId {
        match self.section(pos.section()) {
            Some(section) => section.block(pos.section_index()),
            None => AIR,
        }
    }

    /// Sets a block and returns the previous one.
    ///
    /// Keeps the heightmap current and queues light work when the change could affect light.
    pub fn set_block(&mut self, pos: LocalPos, block: BlockId) -> BlockId {
        let old = self.get_block(pos);
        if old == block {
            return old;
        }
        self.ensure_section(pos.section())
            .set_block(pos.section_index(), block);
        self.touch(pos);

        let old_props = self.blocks.props(old);
        let new_props = self.blocks.props(block);
        self.update_height(pos, new_props.light_relevant());

        if old_props.emission != new_props.emission || old_props.filter != new_props.filter {
            let packed = pos.packed();
            self.lights.remove(&packed);
            if new_props.emission > 0 {
                self.lights.insert(packed, new_props.emission);
            }
            if new_props.filter > old_props.filter || new_props.emission < old_props.emission {
                self.light_work.push(LightOp::Remove(pos));
            }
            if new_props.emission > 0 {
                self.light_work.push(LightOp::Add(pos));
            }
            self.light_work.push(LightOp::Update(pos));
            self.needs_relight = true;
        }
        old
    }

    fn update_height(&mut self, pos: LocalPos, relevant: bool) {
        let column = pos.column();
        let old = self.heightmap[column];
        let top = pos.y as u16 + 1;
        let new = if relevant {
            old.max(top)
        } else if top == old {
            (0..pos.y)
                .rev()
                .find(|y| {
                    let below = LocalPos::new(pos.x, *y, pos.z);
                    self.blocks.props(self.get_block(below)).light_relevant()
                })
                .map(|y| y as u16 + 1)
                .unwrap_or(0)
        } else {
            old
        };
        if new != old {
            self.heightmap[column] = new;
            self.refresh_sky_column(pos.x, pos.z, old, new);
        }
    }

    /// Rewrites vertical sky light between the old and the new column height.
    fn refresh_sky_column(&mut self, x: u8, z: u8, old: u16, new: u16) {
        let (low, high) = (old.min(new), old.max(new));
        for y in low..high {
            let pos = LocalPos::new(x, y as u8, z);
            if let Some(section) = self.sections[pos.section()].as_deref_mut() {
                let value = if y >= new { MAX_LIGHT } else { 0 };
                section.sky_light.set(pos.section_index(), value);
            }
        }
    }

    pub fn get_meta(&self, pos: LocalPos) -> u8 {
        match self.section(pos.section()) {
            Some(section) => section.meta.get(pos.section_index()),
            None => 0,
        }
    }

    pub fn set_meta(&mut self, pos: LocalPos, meta: u8) {
        if self.get_meta(pos) == meta & 0xf {
            return;
        }
        self.ensure_section(pos.section())
            .meta
            .set(pos.section_index(), meta);
        self.touch(pos);
    }

    pub fn get_block_light(&self, pos: LocalPos) -> u8 {
        match self.section(pos.section()) {
            Some(section) => section.block_light.get(pos.section_index()),
            None => 0,
        }
    }

    /// Stores a block-light value without propagating it.
    pub fn set_block_light(&mut self, pos: LocalPos, light: u8) {
        if self.get_block_light(pos) == light & 0xf {
            return;
        }
        self.ensure_section(pos.section())
            .block_light
            .set(pos.section_index(), light);
        self.dirty = true;
        self.version += 1;
    }

    pub fn get_sky_light(&self, pos: LocalPos) -> u8 {
        match self.section(pos.section()) {
            Some(section) => section.sky_light.get(pos.section_index()),
            None if pos.y as u16 >= self.heightmap[pos.column()] => MAX_LIGHT,
            None => 0,
        }
    }

    pub fn set_sky_light(&mut self, pos: LocalPos, light: u8) {
        if self.get_sky_light(pos) == light & 0xf {
            return;
        }
        self.ensure_section(pos.section())
            .sky_light
            .set(pos.section_index(), light);
        self.dirty = true;
        self.version += 1;
    }

    pub fn get_biome(&self, x: u8, z: u8) -> u8 {
        self.biomes[(z as usize) << 4 | x as usize]
    }

    pub fn set_biome(&mut self, x: u8, z: u8, biome: u8) {
        let column = (z as usize) << 4 | x as usize;
        if self.biomes[column] != biome {
            self.biomes[column] = biome;
            self.dirty = true;
            self.version += 1;
        }
    }

    pub fn biomes(&self) -> &[u8; COLUMN_COUNT] {
        &self.biomes
    }

    /// One plus the highest light-relevant block in the column, or 0 for an empty column.
    pub fn height(&self, x: u8, z: u8) -> u16 {
        self.heightmap[(z as usize) << 4 | x as usize]
    }

    pub fn heightmap(&self) -> &[u16; COLUMN_COUNT] {
        &self.heightmap
    }

    pub fn needs_relight(&self) -> bool {
        self.needs_relight
    }

    pub(crate) fn set_relit(&mut self) {
        self.needs_relight = false;
    }

    pub fn terrain_populated(&self) -> bool {
        self.terrain_populated
    }

    pub fn set_terrain_populated(&mut self, populated: bool) {
        self.terrain_populated = populated;
        self.dirty = true;
    }

    /// Bitmask of the subsections that are allocated.
    pub fn section_mask(&self) -> u16 {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .fold(0u16, |mask, (i, _)| mask | 1 << i)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Incremented on every change that is visible in a network snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self, pos: LocalPos) {
        self.dirty = true;
        self.version += 1;
        if self.changed.insert(pos.packed()) {
            self.changes.push(pos);
        }
    }

    /// Block positions changed since the last call, in the order they first changed.
    pub(crate) fn take_changes(&mut self) -> Vec<LocalPos> {
        self.changed.clear();
        std::mem::take(&mut self.changes)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::block::{block_props, GLASS, STONE, TORCH};
    use crate::chunk::CHUNK_HEIGHT;

    /// Recomputes a column height from scratch.
    pub(crate) fn scanned_height(chunk: &Chunk, x: u8, z: u8) -> u16 {
        (0..CHUNK_HEIGHT)
            .rev()
            .find(|y| block_props(chunk.get_block(LocalPos::new(x, *y as u8, z))).light_relevant())
            .map(|y| y as u16 + 1)
            .unwrap_or(0)
    }

    #[test]
    fn absent_sections_read_as_air() {
        let chunk = Chunk::new(ChunkPos::new(0, 0));
        let pos = LocalPos::new(4, 100, 4);
        assert_eq!(chunk.get_block(pos), AIR);
        assert_eq!(chunk.get_block_light(pos), 0);
        assert_eq!(chunk.get_sky_light(pos), MAX_LIGHT);
        assert_eq!(chunk.section_mask(), 0);
    }

    #[test]
    fn set_block_allocates_and_counts() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        chunk.set_block(LocalPos::new(1, 17, 1), STONE);
        chunk.set_block(LocalPos::new(2, 17, 1), STONE);
        assert_eq!(chunk.section_mask(), 0b10);
        assert_eq!(chunk.section(1).unwrap().block_count(), 2);
        chunk.set_block(LocalPos::new(2, 17, 1), AIR);
        assert_eq!(chunk.section(1).unwrap().block_count(), 1);
    }

    #[test]
    fn heightmap_rescans_after_removing_top() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        chunk.set_block(LocalPos::new(3, 10, 3), STONE);
        chunk.set_block(LocalPos::new(3, 40, 3), STONE);
        chunk.set_block(LocalPos::new(3, 50, 3), GLASS);
        assert_eq!(chunk.height(3, 3), 41);
        chunk.set_block(LocalPos::new(3, 40, 3), AIR);
        assert_eq!(chunk.height(3, 3), 11);
        chunk.set_block(LocalPos::new(3, 10, 3), TORCH);
        assert_eq!(chunk.height(3, 3), 11);
        chunk.set_block(LocalPos::new(3, 10, 3), AIR);
        assert_eq!(chunk.height(3, 3), 0);
    }

    #[test]
    fn heightmap_matches_scan_after_random_edits() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let palette = [AIR, STONE, GLASS, TORCH, crate::block::LEAVES];
        for _ in 0..4000 {
            let pos = LocalPos::new(rng.gen_range(0..4), rng.gen_range(0..64), rng.gen_range(0..4));
            chunk.set_block(pos, palette[rng.gen_range(0..palette.len())]);
        }
        for x in 0..16 {
            for z in 0..16 {
                assert_eq!(chunk.height(x, z), scanned_height(&chunk, x, z));
            }
        }
    }

    #[test]
    fn sky_light_follows_column_height() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        chunk.set_block(LocalPos::new(0, 5, 0), GLASS);
        assert_eq!(chunk.get_sky_light(LocalPos::new(0, 4, 0)), MAX_LIGHT);
        chunk.set_block(LocalPos::new(0, 8, 0), STONE);
        assert_eq!(chunk.get_sky_light(LocalPos::new(0, 4, 0)), 0);
        assert_eq!(chunk.get_sky_light(LocalPos::new(0, 9, 0)), MAX_LIGHT);
        chunk.set_block(LocalPos::new(0, 8, 0), AIR);
        assert_eq!(chunk.get_sky_light(LocalPos::new(0, 4, 0)), MAX_LIGHT);
    }

    #[test]
    fn changes_and_version_follow_mutation() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let version = chunk.version();
        chunk.set_block(LocalPos::new(0, 0, 0), STONE);
        chunk.set_block(LocalPos::new(0, 0, 0), STONE);
        chunk.set_meta(LocalPos::new(0, 0, 0), 3);
        assert!(chunk.version() > version);
        assert_eq!(chunk.take_changes(), vec![LocalPos::new(0, 0, 0)]);
        assert!(chunk.take_changes().is_empty());
    }

    #[test]
    fn light_sources_are_tracked_sparsely() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let pos = LocalPos::new(5, 70, 5);
        chunk.set_block(pos, TORCH);
        assert_eq!(chunk.lights.get(&pos.packed()), Some(&14));
        assert!(chunk.needs_relight());
        chunk.set_block(pos, STONE);
        assert!(chunk.lights.is_empty());
    }
}
