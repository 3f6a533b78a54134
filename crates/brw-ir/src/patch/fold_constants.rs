//! Constant folding and propagation.
//!
//! Scalar `load_const` values are propagated into their users' sources, ALU instructions whose sources are all
//! immediates are evaluated. Pure instructions left without users are removed afterwards.

use std::convert::Infallible;

use ahash::AHashMap;
use smallvec::{smallvec, SmallVec};

use crate::shader::{Instr, Shader, Src, Ssa};

use super::Patch;

#[derive(Default)]
pub struct FoldConstants {
    ///Number of ALU instructions folded by the last run.
    pub folded: usize,
    ///Number of instructions removed as dead by the last run.
    pub removed: usize,
}

impl FoldConstants {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Patch for FoldConstants {
    type Err = Infallible;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        self.folded = 0;
        let mut consts: AHashMap<Ssa, u32> = AHashMap::default();

        for instr in shader.instrs.iter_mut() {
            for src in instr.srcs_mut() {
                if let Src::Ssa(s) = src {
                    if let Some(value) = consts.get(s) {
                        *src = Src::Const(*value);
                    }
                }
            }

            let folded = match &*instr {
                Instr::LoadConst { dest, values } if values.len() == 1 => {
                    consts.insert(*dest, values[0]);
                    None
                }
                Instr::Alu {
                    dest,
                    op,
                    srcs,
                    components: 1,
                } => {
                    let imms: Option<SmallVec<[u32; 3]>> = srcs
                        .iter()
                        .map(|s| match s {
                            Src::Const(c) => Some(*c),
                            Src::Ssa(_) => None,
                        })
                        .collect();
                    imms.and_then(|imms| op.fold(&imms)).map(|value| (*dest, value))
                }
                _ => None,
            };

            if let Some((dest, value)) = folded {
                *instr = Instr::LoadConst {
                    dest,
                    values: smallvec![value],
                };
                consts.insert(dest, value);
                self.folded += 1;
            }
        }

        self.removed = remove_dead_instrs(&mut shader);
        if self.folded > 0 || self.removed > 0 {
            log::trace!(
                "constant folding: folded {}, removed {}",
                self.folded,
                self.removed
            );
        }
        Ok(shader)
    }
}

///Removes pure instructions whose results are never used. Returns how many were removed.
pub(crate) fn remove_dead_instrs(shader: &mut Shader) -> usize {
    let mut removed = 0;
    loop {
        let uses = shader.use_counts();
        let before = shader.instrs.len();
        shader.instrs.retain(|instr| {
            !(instr.is_pure() && instr.dest().map_or(false, |d| !uses.contains_key(&d)))
        });
        let now = shader.instrs.len();
        if now == before {
            break;
        }
        removed += before - now;
    }
    removed
}
