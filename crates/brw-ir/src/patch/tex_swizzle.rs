//! Texture result swizzling.
//!
//! Hardware without shader channel select (before Haswell) needs the API texture swizzle applied in the shader.
//! Swizzles are packed like the sampler key stores them: 3 bits per channel, x in the low bits.

use std::convert::Infallible;

use ahash::AHashMap;

use crate::{
    shader::{AluOp, Instr, Shader, Src, Ssa, TexOp},
    Builder,
};

use super::Patch;

pub const SWIZZLE_ZERO: u16 = 4;
pub const SWIZZLE_ONE: u16 = 5;
///`xyzw`
pub const SWIZZLE_NOOP: u16 = make_swizzle([0, 1, 2, 3]);

pub const fn make_swizzle(channels: [u16; 4]) -> u16 {
    channels[0] | (channels[1] << 3) | (channels[2] << 6) | (channels[3] << 9)
}

pub fn swizzle_channel(swizzle: u16, channel: usize) -> u16 {
    (swizzle >> (3 * channel)) & 0x7
}

pub struct LowerTexSwizzle {
    ///Per texture unit swizzle.
    pub swizzles: [u16; 32],
}

impl LowerTexSwizzle {
    pub fn new(swizzles: [u16; 32]) -> Self {
        LowerTexSwizzle { swizzles }
    }

    fn is_noop(&self) -> bool {
        self.swizzles.iter().all(|s| *s == SWIZZLE_NOOP)
    }
}

impl Patch for LowerTexSwizzle {
    type Err = Infallible;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        if self.is_noop() {
            return Ok(shader);
        }

        let instrs = std::mem::take(&mut shader.instrs);
        let mut renamed: AHashMap<Ssa, Ssa> = AHashMap::default();
        let mut b = Builder::new(&mut shader);

        for mut instr in instrs {
            for src in instr.srcs_mut() {
                if let Src::Ssa(s) = src {
                    if let Some(new) = renamed.get(s) {
                        *src = Src::Ssa(*new);
                    }
                }
            }

            let lowered = match &instr {
                Instr::Tex {
                    dest,
                    op,
                    texture_index,
                    ..
                } if *op != TexOp::Txs && *texture_index < 32 => {
                    Some((*dest, *op, *texture_index as usize))
                }
                _ => None,
            };
            let (dest, op, unit) = match lowered {
                Some(t) => t,
                None => {
                    b.push(instr);
                    continue;
                }
            };

            let swizzle = self.swizzles[unit];
            if swizzle == SWIZZLE_NOOP {
                b.push(instr);
                continue;
            }

            if op == TexOp::Tg4 {
                //Gathers return a single channel of four texels, the swizzle selects which one.
                if let Instr::Tex { component, .. } = &mut instr {
                    let channel = swizzle_channel(swizzle, *component as usize);
                    if channel < 4 {
                        *component = channel as u8;
                        b.push(instr);
                    } else {
                        b.push(instr);
                        let value = if channel == SWIZZLE_ONE { 1.0f32 } else { 0.0 };
                        let c = b.imm_vec(&[value.to_bits(); 4]);
                        renamed.insert(dest, c);
                    }
                }
                continue;
            }

            let channels = [0, 1, 2, 3].map(|c| swizzle_channel(swizzle, c) as u8);
            b.push(instr);
            let swizzled = b.alu(AluOp::Swizzle(channels), &[Src::Ssa(dest)], 4);
            renamed.insert(dest, swizzled);
        }

        Ok(shader)
    }
}
