//! # UBO push range analysis
//!
//! Decides which parts of which UBOs are worth pushing into the thread payload instead of being pulled with
//! sampler messages. Every constant-block, constant-offset `load_ubo` marks the 32-byte chunks it touches, each
//! contiguous run of chunks becomes a candidate and the best scoring candidates win.
//!
//! This is a greedy heuristic, two ranges separated by a small hole are never combined.

use brw_ir::{Intrinsic, Shader, Src, Stage};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

///Push constant slots of the hardware.
pub const MAX_PUSH_RANGES: usize = 4;

///Chunks a block can push. Chunks are 32 bytes.
const MAX_CHUNKS: u32 = 64;

///A range of one UBO, in 32-byte units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UboRange {
    pub block: u32,
    pub start: u8,
    pub length: u8,
}

#[derive(Clone, Copy)]
struct BlockInfo {
    block: u32,
    ///Bitmask of touched chunks.
    offsets: u64,
    uses: [u8; MAX_CHUNKS as usize],
}

struct RangeEntry {
    range: UboRange,
    benefit: i32,
}

impl RangeEntry {
    fn score(&self) -> i32 {
        2 * self.benefit - self.range.length as i32
    }
}

///Result of [analyze_ubo_ranges].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UboAnalysis {
    ///Best ranges first. Unused slots are zero.
    pub ranges: [UboRange; MAX_PUSH_RANGES],
    ///Whether the shader reads plain uniforms which need a push slot of their own.
    pub uses_regular_uniforms: bool,
}

impl UboAnalysis {
    pub fn active_ranges(&self) -> impl Iterator<Item = &UboRange> {
        self.ranges.iter().filter(|r| r.length > 0)
    }
}

pub fn analyze_ubo_ranges(shader: &Shader) -> UboAnalysis {
    //Compute shaders always push the subgroup ID.
    let mut uses_regular_uniforms = shader.stage == Stage::Compute;
    let mut blocks: SmallVec<[BlockInfo; 4]> = SmallVec::new();
    let consts = shader.scalar_consts();
    let as_const = |src: &Src| match src {
        Src::Const(c) => Some(*c),
        Src::Ssa(s) => consts.get(s).copied(),
    };

    for instr in &shader.instrs {
        let (op, srcs, components) = match instr {
            brw_ir::Instr::Intrinsic {
                op,
                srcs,
                components,
                ..
            } => (op, srcs, *components),
            _ => continue,
        };

        match op {
            Intrinsic::LoadUniform { .. } => uses_regular_uniforms = true,
            Intrinsic::LoadUbo => {
                //Indirect loads always get pulled.
                let (block, byte_offset) = match (as_const(&srcs[0]), as_const(&srcs[1])) {
                    (Some(block), Some(offset)) => (block, offset),
                    _ => continue,
                };

                let start = byte_offset / 32;
                if start >= MAX_CHUNKS {
                    continue;
                }
                //Loads running past the last chunk only cover the chunks in range.
                let bytes = u64::from(components) * 4;
                let end = ((u64::from(byte_offset) + bytes + 31) / 32).min(u64::from(MAX_CHUNKS)) as u32;
                let chunks = end - start;

                let info = match blocks.iter_mut().position(|b| b.block == block) {
                    Some(idx) => &mut blocks[idx],
                    None => {
                        blocks.push(BlockInfo {
                            block,
                            offsets: 0,
                            uses: [0; MAX_CHUNKS as usize],
                        });
                        let last = blocks.len() - 1;
                        &mut blocks[last]
                    }
                };
                info.offsets |= low_bits(chunks) << start;
                info.uses[start as usize] = info.uses[start as usize].saturating_add(1);
            }
            _ => {}
        }
    }

    let mut entries: Vec<RangeEntry> = Vec::new();
    for info in &blocks {
        let mut offsets = info.offsets;
        while offsets != 0 {
            let first_bit = offsets.trailing_zeros();
            let holes = !offsets & !low_bits(first_bit);
            let first_hole = if holes == 0 { 64 } else { holes.trailing_zeros() };
            let length = first_hole - first_bit;

            let benefit = info.uses[first_bit as usize..first_hole as usize]
                .iter()
                .map(|u| *u as i32)
                .sum();
            entries.push(RangeEntry {
                range: UboRange {
                    block: info.block,
                    start: first_bit as u8,
                    length: length as u8,
                },
                benefit,
            });

            offsets &= !(low_bits(length) << first_bit);
        }
    }

    //Best score first. Ties go to the higher block, then to the earlier start.
    entries.sort_by(|a, b| {
        b.score()
            .cmp(&a.score())
            .then(b.range.block.cmp(&a.range.block))
            .then(a.range.start.cmp(&b.range.start))
    });

    let max_ranges = MAX_PUSH_RANGES - uses_regular_uniforms as usize;
    let mut ranges = [UboRange::default(); MAX_PUSH_RANGES];
    for (slot, entry) in ranges.iter_mut().zip(entries.iter().take(max_ranges)) {
        *slot = entry.range;
    }

    log::trace!(
        "{} shader: {} push range candidates, kept {}",
        shader.stage.name(),
        entries.len(),
        entries.len().min(max_ranges)
    );

    UboAnalysis {
        ranges,
        uses_regular_uniforms,
    }
}

#[inline]
fn low_bits(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}
