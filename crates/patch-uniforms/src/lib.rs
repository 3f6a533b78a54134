//! # Uniform setup
//!
//! Two pieces that decide how constants reach a shader:
//!
//! - [sysvals]: moves system value reads into a driver filled constant buffer and accounts for every constant
//!   buffer the shader binds.
//! - [ubo_ranges]: picks the UBO ranges that get pushed.
//!
//! The remapping has to run before the binding table is set up, the range analysis runs on the remapped shader.
#![deny(warnings)]

use brw_ir::IrError;
use thiserror::Error;

pub mod sysvals;
pub mod ubo_ranges;

pub use sysvals::{SetupUniforms, SystemValue, UniformLayout, BRW_IMAGE_PARAM_SIZE, MAX_CONSTANT_BUFFERS};
pub use ubo_ranges::{analyze_ubo_ranges, UboAnalysis, UboRange, MAX_PUSH_RANGES};

#[derive(Error, Debug)]
pub enum RemapError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("Shader needs {0} constant buffers, at most 15 are available")]
    TooManyConstantBuffers(u32),
    #[error("Constant data load of {load_size} bytes, but the shader only has {size} bytes of constant data")]
    ConstantDataOutOfRange { load_size: u32, size: u32 },
    #[error("Kernel input read at {base}..{base}+{range} is outside of the {size} input bytes")]
    KernelInputOutOfRange { base: u32, range: u32, size: u32 },
    #[error("Workgroup size is only loaded from constants when it is variable")]
    FixedWorkgroupSize,
}
