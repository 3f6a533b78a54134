//! Applies a computed [BindingTable] to a shader.
//!
//! The backend compiler is not expected to change binding table indices afterwards, every surface reference
//! leaves this pass as a final hardware index.

use ahash::AHashMap;
use brw_ir::{AluOp, Builder, Instr, Shader, Src, Ssa, TexOp};

use crate::{
    group::{group_mask, surface_src, SurfaceGroup},
    layout::{BindingTable, BindingTableParams, WA_16BIT, WA_8BIT, WA_SIGN},
    BindingTableError,
};

pub fn apply_binding_table(
    shader: &mut Shader,
    bt: &BindingTable,
    params: &BindingTableParams,
) -> Result<(), BindingTableError> {
    let consts = shader.scalar_consts();
    let instrs = std::mem::take(&mut shader.instrs);
    let mut renamed: AHashMap<Ssa, Ssa> = AHashMap::default();
    let mut b = Builder::new(shader);

    for mut instr in instrs {
        for src in instr.srcs_mut() {
            if let Src::Ssa(s) = src {
                if let Some(new) = renamed.get(s) {
                    *src = Src::Ssa(*new);
                }
            }
        }

        match &mut instr {
            Instr::Tex {
                dest,
                op,
                texture_index,
                component,
                ..
            } => {
                let dest = *dest;
                let is_gather = params.ver < 8 && *op == TexOp::Tg4;
                let unit = *texture_index;

                //Rewrite the tg4 component from green to blue before replacing the texture index.
                if params.verx10 == 70
                    && *component == 1
                    && unit < 32
                    && params.gather.channel_quirk_mask & (1 << unit) != 0
                {
                    *component = 2;
                }

                let wa = if is_gather && params.ver == 6 && unit < 32 {
                    params.gather.gfx6_gather_wa[unit as usize]
                } else {
                    0
                };

                let group = if is_gather {
                    SurfaceGroup::TextureGather
                } else {
                    SurfaceGroup::Texture
                };
                *texture_index = bt.group_index_to_bti(group, unit);
                b.push(instr);

                if wa != 0 {
                    let fixed = gfx6_gather_fixup(&mut b, dest, wa);
                    renamed.insert(dest, fixed);
                }
            }
            Instr::Intrinsic { op, srcs, .. } => {
                if let Some((src_idx, group)) = surface_src(op, params.ver) {
                    if bt.size(group) == 0 {
                        return Err(BindingTableError::EmptyGroup { group });
                    }

                    let src = srcs[src_idx];
                    let constant = match src {
                        Src::Const(c) => Some(c),
                        Src::Ssa(s) => consts.get(&s).copied(),
                    };
                    srcs[src_idx] = match constant {
                        Some(index) => Src::Const(bt.group_index_to_bti(group, index)),
                        None => {
                            //Indirect usage makes all the surfaces of the group available, so we can just add
                            // the base.
                            if bt.used(group) != group_mask(bt.size(group)) {
                                return Err(BindingTableError::PartialIndirectGroup { group });
                            }
                            Src::Ssa(b.iadd(src, bt.offset(group)))
                        }
                    };
                }
                b.push(instr);
            }
            _ => b.push(instr),
        }
    }

    Ok(())
}

///Sandybridge returns gathers of 8/16 bit integer formats as normalized floats. Converts back to the
/// (possibly sign extended) integer value.
fn gfx6_gather_fixup(b: &mut Builder, texel: Ssa, wa: u8) -> Ssa {
    let width: u32 = if wa & WA_8BIT != 0 {
        8
    } else {
        debug_assert!(wa & WA_16BIT != 0, "gather workaround without a width");
        16
    };

    let scale = ((1u32 << width) - 1) as f32;
    let val = b.alu(AluOp::Fmul, &[Src::Ssa(texel), Src::float(scale)], 4);
    let mut val = b.alu(AluOp::F2u32, &[Src::Ssa(val)], 4);
    if wa & WA_SIGN != 0 {
        let shl = b.alu(AluOp::Ishl, &[Src::Ssa(val), Src::Const(32 - width)], 4);
        val = b.alu(AluOp::Ishr, &[Src::Ssa(shl), Src::Const(32 - width)], 4);
    }
    val
}
