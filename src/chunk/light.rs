//! Incremental block-light flood fill.
//!
//! Light is scoped to a single chunk: positions outside the chunk read as dark and are never
//! written. Work is split into a removal queue and an addition queue; a pass always drains the
//! removals first so that additions spread into a fully cleared area.

use std::collections::VecDeque;

use log::trace;

use crate::block::MAX_LIGHT;
use crate::chunk::{Chunk, LocalPos};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LightOp {
    /// Sets the position to the level of the light source registered there.
    Add(LocalPos),
    /// Recomputes the position from its neighbors, raising it if possible.
    Update(LocalPos),
    /// Clears the position and starts a removal wave.
    Remove(LocalPos),
    /// Part of a removal wave coming from a neighbor whose old level was `from`.
    RemoveUpdate { pos: LocalPos, from: u8 },
}

#[derive(Default)]
pub(crate) struct LightWork {
    removals: VecDeque<LightOp>,
    additions: VecDeque<LightOp>,
}

impl LightWork {
    pub(crate) fn push(&mut self, op: LightOp) {
        match op {
            LightOp::Remove(_) | LightOp::RemoveUpdate { .. } => self.removals.push_back(op),
            LightOp::Add(_) | LightOp::Update(_) => self.additions.push_back(op),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.removals.len() + self.additions.len()
    }
}

/// Light at `pos` given the brightest neighbor, using signed math so that a negative
/// result means "no contribution" before clamping.
fn decayed(best_neighbor: u8, filter: u8, emission: u8) -> u8 {
    let candidate = best_neighbor as i8 - 1 - filter as i8;
    candidate.max(emission as i8).clamp(0, MAX_LIGHT as i8) as u8
}

impl Chunk {
    /// Runs queued light work to a fixed point and returns the number of operations applied.
    pub fn relight(&mut self) -> usize {
        let mut processed = 0;
        while !self.light_work.is_empty() {
            let mut broken = vec![];
            let mut boundary = vec![];
            while let Some(op) = self.light_work.removals.pop_front() {
                self.apply_removal(op, &mut broken, &mut boundary);
                processed += 1;
            }
            // Sources hit by the wave and the edge of the cleared area are replayed only once the
            // wave is done, so nothing is re-lit just to be cleared again.
            for pos in broken {
                self.light_work.push(LightOp::Add(pos));
            }
            for pos in boundary {
                for neighbor in pos.neighbors() {
                    self.light_work.push(LightOp::Update(neighbor));
                }
            }
            while let Some(op) = self.light_work.additions.pop_front() {
                self.apply_addition(op);
                processed += 1;
            }
        }
        self.set_relit();
        trace!("Relit chunk {} with {} light operations", self.pos(), processed);
        processed
    }

    fn brightest_neighbor(&self, pos: LocalPos) -> u8 {
        pos.neighbors()
            .map(|n| self.get_block_light(n))
            .max()
            .unwrap_or(0)
    }

    fn apply_addition(&mut self, op: LightOp) {
        match op {
            LightOp::Add(pos) => {
                let Some(level) = self.lights.get(&pos.packed()).copied() else {
                    return;
                };
                if self.get_block_light(pos) < level {
                    self.set_block_light(pos, level);
                }
                for neighbor in pos.neighbors() {
                    self.light_work.push(LightOp::Update(neighbor));
                }
            }
            LightOp::Update(pos) => {
                let props = self.blocks.props(self.get_block(pos));
                let candidate =
                    decayed(self.brightest_neighbor(pos), props.filter, props.emission);
                if candidate <= self.get_block_light(pos) {
                    return;
                }
                self.set_block_light(pos, candidate);
                for neighbor in pos.neighbors() {
                    if self.get_block_light(neighbor) + 1 < candidate {
                        self.light_work.push(LightOp::Update(neighbor));
                    }
                }
            }
            _ => unreachable!("removal in addition queue"),
        }
    }

    fn apply_removal(&mut self, op: LightOp, broken: &mut Vec<LocalPos>, boundary: &mut Vec<LocalPos>) {
        match op {
            LightOp::Remove(pos) => {
                let old = self.get_block_light(pos);
                if old == 0 {
                    return;
                }
                self.set_block_light(pos, 0);
                for neighbor in pos.neighbors() {
                    self.light_work
                        .push(LightOp::RemoveUpdate { pos: neighbor, from: old });
                }
            }
            LightOp::RemoveUpdate { pos, from } => {
                let current = self.get_block_light(pos);
                if current == 0 {
                    return;
                }
                if current >= from {
                    // Lit independently of the removed light: the wave stops here.
                    boundary.push(pos);
                    return;
                }
                self.set_block_light(pos, 0);
                if self.lights.contains_key(&pos.packed()) {
                    broken.push(pos);
                }
                for neighbor in pos.neighbors() {
                    self.light_work
                        .push(LightOp::RemoveUpdate { pos: neighbor, from: current });
                }
            }
            _ => unreachable!("addition in removal queue"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::block::{
        BlockLookup, BlockProps, StaticBlocks, AIR, GLASS, GLOWSTONE, LEAVES, STONE, TORCH, WATER,
    };
    use crate::chunk::{ChunkPos, CHUNK_HEIGHT, SECTION_EDGE};

    /// Every block must equal max(emission, brightest neighbor - 1 - filter), clamped to [0, 15].
    fn assert_converged(chunk: &Chunk, max_y: usize) {
        for y in 0..max_y.min(CHUNK_HEIGHT) {
            for z in 0..SECTION_EDGE as u8 {
                for x in 0..SECTION_EDGE as u8 {
                    let pos = LocalPos::new(x, y as u8, z);
                    let props = chunk.blocks.props(chunk.get_block(pos));
                    let expected =
                        decayed(chunk.brightest_neighbor(pos), props.filter, props.emission);
                    let actual = chunk.get_block_light(pos);
                    assert!(actual <= MAX_LIGHT);
                    assert_eq!(actual, expected, "light at {:?}", pos);
                }
            }
        }
    }

    #[test]
    fn decayed_never_goes_negative() {
        assert_eq!(decayed(14, 15, 0), 0);
        assert_eq!(decayed(0, 0, 0), 0);
        assert_eq!(decayed(15, 0, 0), 14);
        assert_eq!(decayed(3, 15, 15), 15);
    }

    #[test]
    fn torch_next_to_stone() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        chunk.set_block(LocalPos::new(0, 64, 0), STONE);
        chunk.set_block(LocalPos::new(1, 64, 0), TORCH);
        chunk.relight();
        assert_eq!(chunk.get_block_light(LocalPos::new(1, 64, 0)), 14);
        assert_eq!(chunk.get_block_light(LocalPos::new(2, 64, 0)), 13);
        assert_eq!(chunk.get_block_light(LocalPos::new(0, 64, 0)), 0);
        assert!(!chunk.needs_relight());
        assert_converged(&chunk, 80);
    }

    #[test]
    fn removing_torch_clears_light() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let torch = LocalPos::new(8, 64, 8);
        chunk.set_block(torch, TORCH);
        chunk.relight();
        assert_eq!(chunk.get_block_light(LocalPos::new(8, 70, 8)), 8);
        chunk.set_block(torch, AIR);
        chunk.relight();
        assert_converged(&chunk, 80);
        assert_eq!(chunk.get_block_light(torch), 0);
        assert_eq!(chunk.get_block_light(LocalPos::new(8, 70, 8)), 0);
    }

    #[test]
    fn stale_add_for_removed_source_is_ignored() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let torch = LocalPos::new(8, 64, 8);
        chunk.set_block(torch, TORCH);
        chunk.set_block(torch, AIR);
        chunk.relight();
        assert_eq!(chunk.get_block_light(torch), 0);
        assert!(chunk.light_work.is_empty());
    }

    #[test]
    fn wall_blocks_light() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        for y in 60..70 {
            for z in 0..16 {
                chunk.set_block(LocalPos::new(7, y, z), STONE);
            }
        }
        chunk.set_block(LocalPos::new(5, 64, 8), TORCH);
        chunk.relight();
        assert_eq!(chunk.get_block_light(LocalPos::new(6, 64, 8)), 13);
        // The only way around is underneath the wall: 13 steps.
        assert_eq!(chunk.get_block_light(LocalPos::new(8, 64, 8)), 1);
        chunk.set_block(LocalPos::new(7, 64, 8), AIR);
        chunk.relight();
        assert_eq!(chunk.get_block_light(LocalPos::new(8, 64, 8)), 11);
        assert_converged(&chunk, 90);
        chunk.set_block(LocalPos::new(7, 64, 8), STONE);
        chunk.relight();
        assert_eq!(chunk.get_block_light(LocalPos::new(8, 64, 8)), 1);
        assert_converged(&chunk, 90);
    }

    #[test]
    fn other_source_survives_removal_wave() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let first = LocalPos::new(4, 64, 8);
        let second = LocalPos::new(10, 64, 8);
        chunk.set_block(first, GLOWSTONE);
        chunk.set_block(second, TORCH);
        chunk.relight();
        assert_eq!(chunk.get_block_light(second), 14);

        chunk.set_block(first, AIR);
        chunk.set_block(first, GLOWSTONE);
        chunk.relight();
        assert_eq!(chunk.get_block_light(second), 14);
        assert_eq!(chunk.get_block_light(first), 15);
        assert_converged(&chunk, 90);

        chunk.set_block(first, AIR);
        chunk.relight();
        assert_eq!(chunk.get_block_light(second), 14);
        assert_eq!(chunk.get_block_light(LocalPos::new(7, 64, 8)), 11);
        assert_converged(&chunk, 90);
    }

    #[test]
    fn adjacent_sources_are_replayed() {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        let glow = LocalPos::new(8, 64, 8);
        let torch = LocalPos::new(9, 64, 8);
        chunk.set_block(glow, GLOWSTONE);
        chunk.set_block(torch, TORCH);
        chunk.relight();
        chunk.set_block(glow, STONE);
        chunk.relight();
        assert_eq!(chunk.get_block_light(torch), 14);
        assert_eq!(chunk.get_block_light(glow), 0);
        assert_converged(&chunk, 90);
    }

    #[test]
    fn random_edits_converge() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let palette = [AIR, AIR, STONE, GLASS, LEAVES, WATER, TORCH, GLOWSTONE];
        let mut chunk = Chunk::new(ChunkPos::new(0, 0));
        for round in 0..30 {
            for _ in 0..25 {
                let pos = LocalPos::new(
                    rng.gen_range(0..16),
                    rng.gen_range(60..76),
                    rng.gen_range(0..16),
                );
                chunk.set_block(pos, palette[rng.gen_range(0..palette.len())]);
            }
            if round % 3 != 0 {
                chunk.relight();
                assert!(chunk.light_work.is_empty());
                assert_converged(&chunk, 100);
            }
        }
    }

    /// Stock table plus a dim lantern under an otherwise unused id.
    struct Lanterns;

    const LANTERN: u8 = 200;

    impl BlockLookup for Lanterns {
        fn props(&self, id: u8) -> BlockProps {
            if id == LANTERN {
                BlockProps {
                    name: "lantern",
                    emission: 9,
                    filter: 0,
                    solid: true,
                }
            } else {
                StaticBlocks.props(id)
            }
        }
    }

    #[test]
    fn lighting_follows_the_chunk_block_table() {
        let mut chunk = Chunk::with_blocks(ChunkPos::new(0, 0), Arc::new(Lanterns));
        let pos = LocalPos::new(8, 40, 8);
        chunk.set_block(pos, LANTERN);
        assert_eq!(chunk.height(8, 8), 41);
        chunk.relight();
        assert_eq!(chunk.get_block_light(pos), 9);
        assert_eq!(chunk.get_block_light(LocalPos::new(8, 43, 8)), 6);
        assert_converged(&chunk, 60);

        // The stock table treats the id as an opaque unknown block.
        let mut stock = Chunk::new(ChunkPos::new(0, 0));
        stock.set_block(pos, LANTERN);
        stock.relight();
        assert_eq!(stock.get_block_light(pos), 0);
    }
}
