use smallvec::{smallvec, SmallVec};

use crate::shader::{AluOp, Instr, Intrinsic, Shader, Src, Ssa, TexOp};

///Bit of `index` in a 64 bit usage mask. Indices past the mask are not tracked.
fn mask_bit(index: u32) -> u64 {
    1u64.checked_shl(index).unwrap_or(0)
}

///Appends instructions at the end of a shader.
///
/// Passes that need to insert in the middle take the instruction list out of the shader,
/// and re-emit it through a builder, interleaving their own instructions.
pub struct Builder<'a> {
    shader: &'a mut Shader,
}

impl<'a> Builder<'a> {
    pub fn new(shader: &'a mut Shader) -> Self {
        Builder { shader }
    }

    pub fn shader(&mut self) -> &mut Shader {
        &mut *self.shader
    }

    ///Pushes an already existing instruction.
    pub fn push(&mut self, instr: Instr) {
        self.shader.instrs.push(instr);
    }

    pub fn undef(&mut self, components: u8) -> Ssa {
        let dest = self.shader.alloc_ssa();
        self.push(Instr::Undef { dest, components });
        dest
    }

    pub fn imm(&mut self, value: u32) -> Ssa {
        self.imm_vec(&[value])
    }

    pub fn imm_f32(&mut self, value: f32) -> Ssa {
        self.imm(value.to_bits())
    }

    pub fn imm_vec(&mut self, values: &[u32]) -> Ssa {
        let dest = self.shader.alloc_ssa();
        self.push(Instr::LoadConst {
            dest,
            values: values.iter().copied().collect(),
        });
        dest
    }

    pub fn alu(&mut self, op: AluOp, srcs: &[Src], components: u8) -> Ssa {
        let dest = self.shader.alloc_ssa();
        self.push(Instr::Alu {
            dest,
            op,
            srcs: srcs.iter().copied().collect(),
            components,
        });
        dest
    }

    pub fn iadd(&mut self, a: impl Into<Src>, b: impl Into<Src>) -> Ssa {
        self.alu(AluOp::Iadd, &[a.into(), b.into()], 1)
    }

    pub fn imul(&mut self, a: impl Into<Src>, b: impl Into<Src>) -> Ssa {
        self.alu(AluOp::Imul, &[a.into(), b.into()], 1)
    }

    pub fn umin(&mut self, a: impl Into<Src>, b: impl Into<Src>) -> Ssa {
        self.alu(AluOp::Umin, &[a.into(), b.into()], 1)
    }

    ///Emits an intrinsic. Returns the destination if the intrinsic produces one.
    pub fn intrinsic(&mut self, op: Intrinsic, srcs: &[Src], components: u8) -> Option<Ssa> {
        let dest = if op.has_dest() {
            Some(self.shader.alloc_ssa())
        } else {
            None
        };
        self.push(Instr::Intrinsic {
            dest,
            op,
            srcs: srcs.iter().copied().collect(),
            components,
        });
        dest
    }

    ///Emits a value producing intrinsic.
    pub fn load(&mut self, op: Intrinsic, srcs: &[Src], components: u8) -> Ssa {
        debug_assert!(op.has_dest(), "{:?} does not produce a value", op);
        let dest = self.shader.alloc_ssa();
        self.push(Instr::Intrinsic {
            dest: Some(dest),
            op,
            srcs: srcs.iter().copied().collect(),
            components,
        });
        dest
    }

    pub fn load_ubo(&mut self, block: impl Into<Src>, offset: impl Into<Src>, components: u8) -> Ssa {
        self.load(Intrinsic::LoadUbo, &[block.into(), offset.into()], components)
    }

    pub fn load_ssbo(&mut self, block: impl Into<Src>, offset: impl Into<Src>, components: u8) -> Ssa {
        self.load(Intrinsic::LoadSsbo, &[block.into(), offset.into()], components)
    }

    pub fn store_ssbo(&mut self, value: impl Into<Src>, block: impl Into<Src>, offset: impl Into<Src>) {
        self.intrinsic(
            Intrinsic::StoreSsbo,
            &[value.into(), block.into(), offset.into()],
            1,
        );
    }

    pub fn load_uniform(&mut self, base: u32, offset: impl Into<Src>, components: u8) -> Ssa {
        self.load(Intrinsic::LoadUniform { base }, &[offset.into()], components)
    }

    pub fn load_input(&mut self, location: u32, components: u8) -> Ssa {
        self.shader.info.inputs_read |= mask_bit(location);
        self.load(Intrinsic::LoadInput { location }, &[], components)
    }

    ///Writes an output and records it in `outputs_written`.
    pub fn store_output(&mut self, location: u32, component: u8, value: impl Into<Src>) {
        self.shader.info.outputs_written |= mask_bit(location);
        self.intrinsic(
            Intrinsic::StoreOutput {
                location,
                component,
            },
            &[value.into()],
            1,
        );
    }

    pub fn tex(
        &mut self,
        op: TexOp,
        texture_index: u32,
        sampler_index: u32,
        coord: impl Into<Src>,
    ) -> Ssa {
        let dest = self.shader.alloc_ssa();
        self.shader.info.textures_used |= mask_bit(texture_index);
        if op == TexOp::Txf {
            self.shader.info.textures_used_by_txf |= mask_bit(texture_index);
        }
        if op == TexOp::Tg4 {
            self.shader.info.uses_texture_gather = true;
        }
        if op != TexOp::Txf && op != TexOp::Txs {
            self.shader.info.samplers_used |= 1u32.checked_shl(sampler_index).unwrap_or(0);
        }
        let srcs: SmallVec<[Src; 3]> = smallvec![coord.into()];
        self.push(Instr::Tex {
            dest,
            op,
            texture_index,
            sampler_index,
            component: 0,
            srcs,
        });
        dest
    }
}
