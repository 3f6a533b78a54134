use crate::{
    shader::{Instr, Intrinsic, Shader, Src, Stage},
    slots::{bit, FRAG_RESULT_COLOR, FRAG_RESULT_DATA0, MAX_DRAW_BUFFERS},
    IrError,
};

use super::Patch;

///Lowers framebuffer fetches to render target reads.
///
/// `load_frag_output` of `FRAG_RESULT_DATAn` reads render target `n`, `FRAG_RESULT_COLOR` reads target 0.
/// The render target index ends up as the source of the lowered `load_output`, which is what the binding table
/// later rewrites.
#[derive(Default)]
pub struct LowerFsOutputs {
    pub lowered: usize,
}

impl Patch for LowerFsOutputs {
    type Err = IrError;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        if shader.stage != Stage::Fragment {
            return Err(IrError::WrongStage {
                pass: "LowerFsOutputs",
                found: shader.stage,
            });
        }

        self.lowered = 0;
        let mut outputs_read = shader.info.outputs_read;
        for instr in shader.instrs.iter_mut() {
            if let Instr::Intrinsic { op, srcs, .. } = instr {
                let location = match op {
                    Intrinsic::LoadFragOutput { location } => *location,
                    _ => continue,
                };
                let rt = if location == FRAG_RESULT_COLOR {
                    0
                } else if (FRAG_RESULT_DATA0..FRAG_RESULT_DATA0 + MAX_DRAW_BUFFERS).contains(&location) {
                    location - FRAG_RESULT_DATA0
                } else {
                    return Err(IrError::Validation {
                        when: "lowering fragment outputs".to_owned(),
                        reason: format!("framebuffer fetch of non colour output {}", location),
                    });
                };

                *op = Intrinsic::LoadOutput { location };
                srcs.clear();
                srcs.push(Src::Const(rt));
                outputs_read |= bit(location);
                self.lowered += 1;
            }
        }
        shader.info.outputs_read = outputs_read;
        Ok(shader)
    }
}
