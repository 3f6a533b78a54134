//! # brw-ir
//!
//! Shader IR shared by the variant pipeline, plus the patching API every stage compile runs
//! before a shader is handed to the backend compiler.
//!
//! It is structured in three parts.
//!
//! - Shader: an SSA instruction list together with the gathered `ShaderInfo`. Only the parts
//!   the driver inspects are modelled (surface accesses, system values, outputs).
//! - Patch: defines the `Patch` API, as well as the generic lowering passes (clip planes, point size,
//!   edge flags, texture swizzles, fragment outputs) and constant folding.
//! - Verify: structural validation used as checkpoints between passes.
//!
#![deny(warnings)]

use thiserror::Error;

mod builder;
pub mod patch;
mod shader;
pub mod slots;
pub mod verify;

pub use builder::Builder;
pub use shader::{
    AluOp, GsInfo, Instr, Intrinsic, OutputPrimitive, Shader, ShaderInfo, Src, Ssa, Stage,
    TessInfo, TessPrimitive, TessSpacing, TexOp,
};

#[derive(Error, Debug)]
pub enum IrError {
    #[error("Shader failed validation {when}: {reason}")]
    Validation { when: String, reason: String },
    #[error("{pass} can not run on a {found:?} shader")]
    WrongStage { pass: &'static str, found: Stage },
    #[error("Could not serialize shader: {0}")]
    Serialize(#[from] serde_json::Error),
}
