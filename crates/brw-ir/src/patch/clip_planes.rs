//! Legacy user clip plane lowering for the last geometry stage.
//!
//! For every enabled plane `i`, `gl_ClipDistance[i] = dot(clip_vertex, ucp[i])` is appended after the final write of
//! the clip vertex (or the position if the shader doesn't write one). The plane itself is read through
//! `load_user_clip_plane`, which later becomes a system value.

use crate::{
    shader::{AluOp, Instr, Intrinsic, Shader, Src, Stage},
    slots::{bit, VARYING_SLOT_CLIP_DIST0, VARYING_SLOT_CLIP_VERTEX, VARYING_SLOT_POS},
    Builder, IrError,
};

use super::Patch;

pub struct LowerClipPlanes {
    ///Bitmask of enabled planes.
    pub ucp_enables: u8,
    ///Set once clip distances were written by the last run.
    pub lowered: bool,
}

impl LowerClipPlanes {
    pub fn new(ucp_enables: u8) -> Self {
        LowerClipPlanes {
            ucp_enables,
            lowered: false,
        }
    }
}

impl Patch for LowerClipPlanes {
    type Err = IrError;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        if !matches!(
            shader.stage,
            Stage::Vertex | Stage::TessEval | Stage::Geometry
        ) {
            return Err(IrError::WrongStage {
                pass: "LowerClipPlanes",
                found: shader.stage,
            });
        }

        self.lowered = false;
        if self.ucp_enables == 0 {
            return Ok(shader);
        }

        let writes_clip_vertex = shader.info.outputs_written & bit(VARYING_SLOT_CLIP_VERTEX) != 0;
        let source_slot = if writes_clip_vertex {
            VARYING_SLOT_CLIP_VERTEX
        } else {
            VARYING_SLOT_POS
        };

        //Last write wins, so lower after it.
        let last_write = shader.instrs.iter().enumerate().rev().find_map(|(idx, i)| match i {
            Instr::Intrinsic {
                op: Intrinsic::StoreOutput { location, .. },
                srcs,
                ..
            } if *location == source_slot => Some((idx, srcs[0])),
            _ => None,
        });

        let (idx, clip_vertex): (usize, Src) = match last_write {
            Some(found) => found,
            None => {
                log::warn!(
                    "{} shader enables user clip planes but writes no clip vertex",
                    shader.stage.name()
                );
                return Ok(shader);
            }
        };

        let tail = shader.instrs.split_off(idx + 1);
        let mut max_plane = 0;
        {
            let mut b = Builder::new(&mut shader);
            for plane in 0..8u32 {
                if self.ucp_enables & (1 << plane) == 0 {
                    continue;
                }
                let ucp = b.load(Intrinsic::LoadUserClipPlane { ucp: plane }, &[], 4);
                let dist = b.alu(AluOp::Fdot4, &[clip_vertex, Src::Ssa(ucp)], 1);
                b.store_output(
                    VARYING_SLOT_CLIP_DIST0 + plane / 4,
                    (plane % 4) as u8,
                    dist,
                );
                max_plane = plane + 1;
            }
        }
        shader.instrs.extend(tail);

        shader.info.clip_distance_array_size = shader.info.clip_distance_array_size.max(max_plane as u8);
        self.lowered = true;
        Ok(shader)
    }
}
