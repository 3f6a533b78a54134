//! # Shader driver
//!
//! Turns API shaders into hardware specific variants. A [screen::Screen] owns everything that is shared
//! between contexts (the variant cache, the compiler threads, the backend), a [update::Context] tracks the bound
//! shaders and the state their variants depend on.
//!
//! On every draw [update::Context::update_compiled_shaders] builds the program key of each dirty stage, looks for
//! a matching variant and compiles one if needed. Compiling runs the generic lowering passes of `brw-ir`, the
//! system value remapping, the binding table setup and finally the [backend::Backend].
#![deny(warnings)]

use std::convert::Infallible;

use brw_ir::{IrError, Stage};
use patch_binding_table::BindingTableError;
use patch_uniforms::RemapError;
use thiserror::Error;
use variant_cache::CacheError;

pub mod backend;
mod compile;
pub mod config;
pub mod keys;
pub mod pool;
pub mod screen;
pub mod shader;
pub mod state;
pub mod update;

pub use backend::{Backend, CompileParams, CompiledCode, ProgData, StageProgData};
pub use config::DriverConfig;
pub use keys::ShaderKey;
pub use screen::{DeviceInfo, Screen};
pub use shader::{CompiledShader, StreamOutputInfo, UncompiledShader};
pub use update::Context;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    BindingTable(#[from] BindingTableError),
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Could not serialize program key: {0}")]
    Key(#[from] serde_json::Error),
    #[error("{} shader failed to compile: {message}", stage.name())]
    Compile { stage: Stage, message: String },
    #[error("No {} shader is bound", stage.name())]
    MissingShader { stage: Stage },
}

impl From<Infallible> for DriverError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}
