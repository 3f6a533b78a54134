//! Structural validation.
//!
//! Checks that the instruction list is in proper SSA form: every name is defined once, before any use, and every
//! instruction carries the number of sources its op expects.

use ahash::AHashSet;

use crate::{
    shader::{Instr, Intrinsic, Shader, Src},
    IrError,
};

///Validates `shader`. `when` names the checkpoint and ends up in the error.
pub fn validate(shader: &Shader, when: &str) -> Result<(), IrError> {
    validate_impl(shader, when, false)
}

///Like [validate], but tolerates `load_ubo` from a placeholder (undef) buffer index which a later pass still has to
/// patch.
pub fn validate_unpatched(shader: &Shader, when: &str) -> Result<(), IrError> {
    validate_impl(shader, when, true)
}

fn validate_impl(shader: &Shader, when: &str, allow_undef_ubo: bool) -> Result<(), IrError> {
    let fail = |reason: String| IrError::Validation {
        when: when.to_owned(),
        reason,
    };

    let mut defined = AHashSet::default();
    let mut undefs = AHashSet::default();
    for (idx, instr) in shader.instrs.iter().enumerate() {
        if let Instr::Undef { dest, .. } = instr {
            undefs.insert(*dest);
        }
        for src in instr.srcs() {
            if let Src::Ssa(s) = src {
                if !defined.contains(s) {
                    return Err(fail(format!(
                        "instruction {} uses %{} before its definition",
                        idx, s.0
                    )));
                }
            }
        }

        match instr {
            Instr::Intrinsic { op, srcs, dest, .. } => {
                if srcs.len() != op.num_srcs() {
                    return Err(fail(format!(
                        "{:?} at {} has {} sources, expected {}",
                        op,
                        idx,
                        srcs.len(),
                        op.num_srcs()
                    )));
                }
                if dest.is_some() != op.has_dest() {
                    return Err(fail(format!("{:?} at {} has a wrong destination", op, idx)));
                }
                //Only the remapper's placeholder is allowed to leave an undefined buffer index, and only
                // until it is patched.
                if !allow_undef_ubo && *op == Intrinsic::LoadUbo {
                    if let Src::Ssa(block) = srcs[0] {
                        if undefs.contains(&block) {
                            return Err(fail(format!("load_ubo at {} reads an undefined buffer", idx)));
                        }
                    }
                }
            }
            Instr::Alu { op, srcs, .. } => {
                if srcs.len() != op.num_srcs() {
                    return Err(fail(format!(
                        "{:?} at {} has {} sources, expected {}",
                        op,
                        idx,
                        srcs.len(),
                        op.num_srcs()
                    )));
                }
            }
            Instr::LoadConst { values, .. } => {
                if values.is_empty() {
                    return Err(fail(format!("load_const at {} has no value", idx)));
                }
            }
            Instr::Tex { srcs, .. } => {
                if srcs.is_empty() {
                    return Err(fail(format!("tex at {} has no coordinate", idx)));
                }
            }
            Instr::Undef { .. } => {}
        }

        if let Some(dest) = instr.dest() {
            if dest.0 >= shader.ssa_count() {
                return Err(fail(format!("%{} was never allocated", dest.0)));
            }
            if !defined.insert(dest) {
                return Err(fail(format!("%{} is defined twice", dest.0)));
            }
        }
    }

    log::trace!(
        "validated {} shader {}: {} instructions",
        shader.stage.name(),
        when,
        shader.instrs.len()
    );
    Ok(())
}
