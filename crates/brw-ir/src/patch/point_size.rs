use crate::{
    shader::{AluOp, Instr, Intrinsic, Shader, Src},
    slots::VARYING_SLOT_PSIZ,
    Builder, IrError,
};

use super::Patch;

///Clamps every `gl_PointSize` write into `[min, max]`.
pub struct ClampPointSize {
    pub min: f32,
    pub max: f32,
}

impl ClampPointSize {
    ///Hardware point size limits.
    pub fn hw_limits() -> Self {
        ClampPointSize {
            min: 1.0,
            max: 255.0,
        }
    }
}

impl Patch for ClampPointSize {
    type Err = IrError;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        if !shader.stage.is_vue() {
            return Err(IrError::WrongStage {
                pass: "ClampPointSize",
                found: shader.stage,
            });
        }

        let instrs = std::mem::take(&mut shader.instrs);
        let mut clamped = 0;
        let mut b = Builder::new(&mut shader);
        for mut instr in instrs {
            if let Instr::Intrinsic {
                op: Intrinsic::StoreOutput {
                    location: VARYING_SLOT_PSIZ,
                    ..
                },
                srcs,
                ..
            } = &mut instr
            {
                let lo = b.alu(AluOp::Fmax, &[srcs[0], Src::float(self.min)], 1);
                let hi = b.alu(AluOp::Fmin, &[Src::Ssa(lo), Src::float(self.max)], 1);
                srcs[0] = Src::Ssa(hi);
                clamped += 1;
            }
            b.push(instr);
        }

        if clamped > 0 {
            log::trace!("clamped {} point size writes", clamped);
        }
        Ok(shader)
    }
}
