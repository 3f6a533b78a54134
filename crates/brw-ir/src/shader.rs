//! # Shader representation
//!
//! A shader is a flat list of instructions in SSA form. Control flow is not modelled, every pass
//! in the pipeline only cares about which resources, system values and outputs a shader touches and in
//! what order instructions are defined.
//!
//! Values are 32-bit. Floats travel as their bit pattern (`f32::to_bits`).

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{patch::Patcher, IrError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Vertex,
        Stage::TessCtrl,
        Stage::TessEval,
        Stage::Geometry,
        Stage::Fragment,
        Stage::Compute,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    ///Human readable stage name, as used by debug output.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::TessCtrl => "tessellation control",
            Stage::TessEval => "tessellation evaluation",
            Stage::Geometry => "geometry",
            Stage::Fragment => "fragment",
            Stage::Compute => "compute",
        }
    }

    pub fn abbrev(self) -> &'static str {
        match self {
            Stage::Vertex => "VS",
            Stage::TessCtrl => "TCS",
            Stage::TessEval => "TES",
            Stage::Geometry => "GS",
            Stage::Fragment => "FS",
            Stage::Compute => "CS",
        }
    }

    ///True for stages that write a VUE (vertex URB entry).
    pub fn is_vue(self) -> bool {
        matches!(
            self,
            Stage::Vertex | Stage::TessCtrl | Stage::TessEval | Stage::Geometry
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ssa(pub u32);

///Instruction source. Either an immediate or a reference to a prior definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Src {
    Const(u32),
    Ssa(Ssa),
}

impl Src {
    pub fn as_ssa(&self) -> Option<Ssa> {
        match self {
            Src::Ssa(s) => Some(*s),
            Src::Const(_) => None,
        }
    }

    pub fn float(value: f32) -> Self {
        Src::Const(value.to_bits())
    }
}

impl From<Ssa> for Src {
    fn from(s: Ssa) -> Self {
        Src::Ssa(s)
    }
}

impl From<u32> for Src {
    fn from(c: u32) -> Self {
        Src::Const(c)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Mov,
    Iadd,
    Imul,
    Umin,
    Ishl,
    Ishr,
    Fadd,
    Fmul,
    Fmin,
    Fmax,
    F2u32,
    Fdot4,
    ///Selects result channels. `0..=3` pick x/y/z/w, 4 is zero and 5 is one.
    Swizzle([u8; 4]),
}

impl AluOp {
    pub fn num_srcs(&self) -> usize {
        match self {
            AluOp::Mov | AluOp::F2u32 | AluOp::Swizzle(_) => 1,
            _ => 2,
        }
    }

    ///Evaluates the op on scalar immediates. Returns `None` for ops that don't fold.
    pub fn fold(&self, srcs: &[u32]) -> Option<u32> {
        let f = |i: usize| f32::from_bits(srcs[i]);
        let value = match self {
            AluOp::Mov => srcs[0],
            AluOp::Iadd => srcs[0].wrapping_add(srcs[1]),
            AluOp::Imul => srcs[0].wrapping_mul(srcs[1]),
            AluOp::Umin => srcs[0].min(srcs[1]),
            AluOp::Ishl => srcs[0].wrapping_shl(srcs[1]),
            AluOp::Ishr => ((srcs[0] as i32).wrapping_shr(srcs[1])) as u32,
            AluOp::Fadd => (f(0) + f(1)).to_bits(),
            AluOp::Fmul => (f(0) * f(1)).to_bits(),
            AluOp::Fmin => f(0).min(f(1)).to_bits(),
            AluOp::Fmax => f(0).max(f(1)).to_bits(),
            AluOp::F2u32 => f(0) as u32,
            AluOp::Fdot4 | AluOp::Swizzle(_) => return None,
        };
        Some(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TexOp {
    Tex,
    Txf,
    Txs,
    Tg4,
}

///Intrinsic operations. Source layouts are noted per variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intrinsic {
    /// `[block, offset]`
    LoadUbo,
    /// `[block, offset]`
    LoadSsbo,
    /// `[value, block, offset]`
    StoreSsbo,
    /// `[block]`
    GetSsboSize,
    /// `[block, offset, data]`
    SsboAtomic,
    /// `[image, coord]`
    ImageLoad,
    /// `[image, coord, value]`
    ImageStore,
    /// `[image]`
    ImageSize,
    /// `[image, coord, data]`
    ImageAtomic,
    ///Reads one vec4 of the image parameter block (pre-gen9 typed surface emulation).
    /// `[array index]`
    ImageLoadParam {
        binding: u32,
        array_len: u32,
        param: u32,
    },
    LoadInput {
        location: u32,
    },
    /// `[value]`
    StoreOutput {
        location: u32,
        component: u8,
    },
    ///Framebuffer fetch before output lowering.
    LoadFragOutput {
        location: u32,
    },
    ///Lowered framebuffer fetch. `[render target]`
    LoadOutput {
        location: u32,
    },
    /// `[offset]`
    LoadUniform {
        base: u32,
    },
    /// `[offset]`
    LoadConstant {
        base: u32,
    },
    LoadUserClipPlane {
        ucp: u32,
    },
    LoadPatchVerticesIn,
    LoadTessLevelOuterDefault,
    LoadTessLevelInnerDefault,
    LoadWorkgroupSize,
    LoadWorkDim,
    /// `[offset]`
    LoadKernelInput {
        base: u32,
        range: u32,
    },
    LoadBaseWorkgroupId,
    LoadNumWorkgroups,
}

impl Intrinsic {
    pub fn num_srcs(&self) -> usize {
        match self {
            Intrinsic::LoadUbo | Intrinsic::LoadSsbo => 2,
            Intrinsic::StoreSsbo | Intrinsic::SsboAtomic => 3,
            Intrinsic::GetSsboSize | Intrinsic::ImageSize => 1,
            Intrinsic::ImageLoad => 2,
            Intrinsic::ImageStore | Intrinsic::ImageAtomic => 3,
            Intrinsic::ImageLoadParam { .. } => 1,
            Intrinsic::StoreOutput { .. } => 1,
            Intrinsic::LoadOutput { .. } => 1,
            Intrinsic::LoadUniform { .. }
            | Intrinsic::LoadConstant { .. }
            | Intrinsic::LoadKernelInput { .. } => 1,
            Intrinsic::LoadInput { .. }
            | Intrinsic::LoadFragOutput { .. }
            | Intrinsic::LoadUserClipPlane { .. }
            | Intrinsic::LoadPatchVerticesIn
            | Intrinsic::LoadTessLevelOuterDefault
            | Intrinsic::LoadTessLevelInnerDefault
            | Intrinsic::LoadWorkgroupSize
            | Intrinsic::LoadWorkDim
            | Intrinsic::LoadBaseWorkgroupId
            | Intrinsic::LoadNumWorkgroups => 0,
        }
    }

    pub fn has_dest(&self) -> bool {
        !matches!(self, Intrinsic::StoreSsbo | Intrinsic::ImageStore | Intrinsic::StoreOutput { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Undef {
        dest: Ssa,
        components: u8,
    },
    LoadConst {
        dest: Ssa,
        values: SmallVec<[u32; 4]>,
    },
    Alu {
        dest: Ssa,
        op: AluOp,
        srcs: SmallVec<[Src; 3]>,
        components: u8,
    },
    Intrinsic {
        dest: Option<Ssa>,
        op: Intrinsic,
        srcs: SmallVec<[Src; 3]>,
        components: u8,
    },
    Tex {
        dest: Ssa,
        op: TexOp,
        texture_index: u32,
        sampler_index: u32,
        ///Gather channel for `Tg4`.
        component: u8,
        srcs: SmallVec<[Src; 3]>,
    },
}

impl Instr {
    pub fn dest(&self) -> Option<Ssa> {
        match self {
            Instr::Undef { dest, .. }
            | Instr::LoadConst { dest, .. }
            | Instr::Alu { dest, .. }
            | Instr::Tex { dest, .. } => Some(*dest),
            Instr::Intrinsic { dest, .. } => *dest,
        }
    }

    pub fn srcs(&self) -> &[Src] {
        match self {
            Instr::Undef { .. } | Instr::LoadConst { .. } => &[],
            Instr::Alu { srcs, .. } | Instr::Intrinsic { srcs, .. } | Instr::Tex { srcs, .. } => {
                srcs.as_slice()
            }
        }
    }

    pub fn srcs_mut(&mut self) -> &mut [Src] {
        match self {
            Instr::Undef { .. } | Instr::LoadConst { .. } => &mut [],
            Instr::Alu { srcs, .. } | Instr::Intrinsic { srcs, .. } | Instr::Tex { srcs, .. } => {
                srcs.as_mut_slice()
            }
        }
    }

    pub fn intrinsic(&self) -> Option<Intrinsic> {
        if let Instr::Intrinsic { op, .. } = self {
            Some(*op)
        } else {
            None
        }
    }

    ///Instructions without side effects can be removed once their result is unused.
    pub fn is_pure(&self) -> bool {
        match self {
            Instr::Undef { .. } | Instr::LoadConst { .. } | Instr::Alu { .. } => true,
            Instr::Intrinsic { .. } | Instr::Tex { .. } => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TessPrimitive {
    #[default]
    Unspecified,
    Triangles,
    Quads,
    Isolines,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TessSpacing {
    #[default]
    Unspecified,
    Equal,
    FractionalOdd,
    FractionalEven,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputPrimitive {
    Points,
    LineStrip,
    #[default]
    TriangleStrip,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TessInfo {
    pub primitive_mode: TessPrimitive,
    pub spacing: TessSpacing,
    pub point_mode: bool,
    pub tcs_vertices_out: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsInfo {
    pub output_primitive: OutputPrimitive,
    pub vertices_out: u16,
    pub invocations: u8,
}

///Information gathered about a shader by the frontend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderInfo {
    pub name: Option<String>,
    pub label: Option<String>,
    ///Bitset of used texture units.
    pub textures_used: u64,
    pub textures_used_by_txf: u64,
    pub samplers_used: u32,
    pub uses_texture_gather: bool,
    pub num_ubos: u32,
    pub num_ssbos: u32,
    pub num_images: u32,
    pub inputs_read: u64,
    pub outputs_written: u64,
    pub outputs_read: u64,
    pub patch_inputs_read: u32,
    pub patch_outputs_written: u32,
    pub clip_distance_array_size: u8,
    pub cull_distance_array_size: u8,
    pub separate_shader: bool,
    pub window_space_position: bool,
    pub tess: TessInfo,
    pub gs: GsInfo,
    pub workgroup_size: [u16; 3],
    pub workgroup_size_variable: bool,
}

///A shader in SSA form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shader {
    pub stage: Stage,
    pub info: ShaderInfo,
    pub instrs: Vec<Instr>,
    ///Size of the default uniform block, in bytes.
    pub num_uniforms: u32,
    ///Shader-embedded constant data, read through `load_constant`.
    pub constant_data: Vec<u8>,
    next_ssa: u32,
}

impl Shader {
    pub fn new(stage: Stage) -> Self {
        Shader {
            stage,
            info: ShaderInfo::default(),
            instrs: Vec::new(),
            num_uniforms: 0,
            constant_data: Vec::new(),
            next_ssa: 0,
        }
    }

    pub fn alloc_ssa(&mut self) -> Ssa {
        let ssa = Ssa(self.next_ssa);
        self.next_ssa += 1;
        ssa
    }

    ///Number of SSA names handed out so far.
    pub fn ssa_count(&self) -> u32 {
        self.next_ssa
    }

    ///Starts a patching chain on this shader.
    pub fn patch(self) -> Patcher {
        Patcher::new(self)
    }

    ///Finds the instruction defining `ssa`.
    pub fn def(&self, ssa: Ssa) -> Option<&Instr> {
        self.instrs.iter().find(|i| i.dest() == Some(ssa))
    }

    ///Scalar immediates defined by `load_const`, by SSA name.
    pub fn scalar_consts(&self) -> AHashMap<Ssa, u32> {
        self.instrs
            .iter()
            .filter_map(|i| match i {
                Instr::LoadConst { dest, values } if values.len() == 1 => Some((*dest, values[0])),
                _ => None,
            })
            .collect()
    }

    ///Returns the immediate value of `src`, looking through `load_const` definitions.
    pub fn src_as_const(&self, src: &Src) -> Option<u32> {
        match src {
            Src::Const(c) => Some(*c),
            Src::Ssa(s) => match self.def(*s) {
                Some(Instr::LoadConst { values, .. }) if values.len() == 1 => Some(values[0]),
                _ => None,
            },
        }
    }

    ///Replaces every use of `old` with `new`.
    pub fn rewrite_uses(&mut self, old: Ssa, new: Src) {
        self.rewrite_uses_after(old, new, 0)
    }

    ///Replaces uses of `old` in instructions at or after index `from`.
    pub fn rewrite_uses_after(&mut self, old: Ssa, new: Src, from: usize) {
        for instr in self.instrs.iter_mut().skip(from) {
            for src in instr.srcs_mut() {
                if *src == Src::Ssa(old) {
                    *src = new;
                }
            }
        }
    }

    ///Counts how often each SSA name is used as a source.
    pub fn use_counts(&self) -> AHashMap<Ssa, usize> {
        let mut uses = AHashMap::default();
        for instr in &self.instrs {
            for src in instr.srcs() {
                if let Src::Ssa(s) = src {
                    *uses.entry(*s).or_insert(0) += 1;
                }
            }
        }
        uses
    }

    ///Iterates all intrinsics together with their sources.
    pub fn intrinsics(&self) -> impl Iterator<Item = (&Intrinsic, &[Src])> {
        self.instrs.iter().filter_map(|i| match i {
            Instr::Intrinsic { op, srcs, .. } => Some((op, srcs.as_slice())),
            _ => None,
        })
    }

    pub fn count_intrinsics(&self, pred: impl Fn(&Intrinsic) -> bool) -> usize {
        self.intrinsics().filter(|(op, _)| pred(op)).count()
    }

    ///Hash over the serialized shader. Stable across processes, used for the disk cache.
    pub fn source_hash(&self) -> Result<[u8; 32], IrError> {
        let blob = serde_json::to_vec(self)?;
        Ok(*blake3::hash(&blob).as_bytes())
    }
}
