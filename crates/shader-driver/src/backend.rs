//! Boundary to the backend compiler that turns a fully lowered shader into machine code.

use brw_ir::{OutputPrimitive, Shader};
use patch_uniforms::{UboRange, MAX_PUSH_RANGES};
use serde::{Deserialize, Serialize};

use crate::{keys::ShaderKey, state::VueMap};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TessOutputTopology {
    Point,
    Line,
    #[default]
    TriCw,
    TriCcw,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VueProgData {
    ///URB entry size in 64 byte units.
    pub urb_entry_size: u32,
    pub vue_map: VueMap,
}

///Stage specific part of [ProgData].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageProgData {
    Vs {
        vue: VueProgData,
        uses_draw_params: bool,
        uses_derived_draw_params: bool,
        ///Vertex id or instance id are fed in through an extra element.
        needs_sgvs_element: bool,
    },
    Tcs {
        vue: VueProgData,
    },
    Tes {
        vue: VueProgData,
        output_topology: TessOutputTopology,
    },
    Gs {
        vue: VueProgData,
        output_topology: OutputPrimitive,
    },
    Fs {
        uses_kill: bool,
        computed_depth: bool,
    },
    Cs {
        simd_size: u8,
        uses_num_work_groups: bool,
    },
}

impl StageProgData {
    pub fn vue(&self) -> Option<&VueProgData> {
        match self {
            StageProgData::Vs { vue, .. }
            | StageProgData::Tcs { vue }
            | StageProgData::Tes { vue, .. }
            | StageProgData::Gs { vue, .. } => Some(vue),
            StageProgData::Fs { .. } | StageProgData::Cs { .. } => None,
        }
    }

    pub fn vue_mut(&mut self) -> Option<&mut VueProgData> {
        match self {
            StageProgData::Vs { vue, .. }
            | StageProgData::Tcs { vue }
            | StageProgData::Tes { vue, .. }
            | StageProgData::Gs { vue, .. } => Some(vue),
            StageProgData::Fs { .. } | StageProgData::Cs { .. } => None,
        }
    }
}

///Everything about a compiled program the state emission needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgData {
    ///Push constant dwords.
    pub nr_params: u32,
    ///Some UBO loads stayed pull loads.
    pub has_ubo_pull: bool,
    pub total_scratch: u32,
    pub ubo_ranges: [UboRange; MAX_PUSH_RANGES],
    pub stage: StageProgData,
}

impl ProgData {
    pub fn new(stage: StageProgData) -> Self {
        ProgData {
            nr_params: 0,
            has_ubo_pull: false,
            total_scratch: 0,
            ubo_ranges: Default::default(),
            stage,
        }
    }
}

///Inputs of one backend compile.
pub struct CompileParams<'a> {
    ///Lowered copy of the shader, owned by this compile.
    pub shader: &'a Shader,
    ///Key with everything already lowered in the IR reset.
    pub key: &'a ShaderKey,
    pub source_hash: [u8; 32],
    ///VUE layout the shader writes. Set for VS, TCS, TES and GS.
    pub vue_map: Option<&'a VueMap>,
    ///VUE layout of the previous stage, set for the fragment shader.
    pub input_vue_map: Option<&'a VueMap>,
}

pub struct CompiledCode {
    pub assembly: Vec<u32>,
    pub prog_data: ProgData,
}

///Backend compiler. Returns the machine code, or a message describing why the shader could not be compiled.
pub trait Backend: Send + Sync {
    fn compile_vs(&self, params: &CompileParams) -> Result<CompiledCode, String>;
    fn compile_tcs(&self, params: &CompileParams) -> Result<CompiledCode, String>;
    fn compile_tes(&self, params: &CompileParams) -> Result<CompiledCode, String>;
    fn compile_gs(&self, params: &CompileParams) -> Result<CompiledCode, String>;
    fn compile_fs(&self, params: &CompileParams) -> Result<CompiledCode, String>;
    fn compile_cs(&self, params: &CompileParams) -> Result<CompiledCode, String>;
}
