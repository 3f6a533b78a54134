//! Context state the variant keys are built from, and dirty tracking.

use bitflags::bitflags;
use brw_ir::{
    slots::{
        bit, VARYING_SLOT_BFC0, VARYING_SLOT_BFC1, VARYING_SLOT_CLIP_DIST0, VARYING_SLOT_CLIP_DIST1,
        VARYING_SLOT_COL0, VARYING_SLOT_COL1, VARYING_SLOT_LAYER, VARYING_SLOT_POS, VARYING_SLOT_PSIZ,
        VARYING_SLOT_VAR0, VARYING_SLOT_VIEWPORT,
    },
    Stage,
};
use serde::{Deserialize, Serialize};

bitflags! {
    ///Context level state that has to be re-emitted.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u64 {
        const URB = 1 << 0;
        const CLIP = 1 << 1;
        const SF_CL_VIEWPORT = 1 << 2;
        const CC_VIEWPORT = 1 << 3;
        const SCISSOR = 1 << 4;
        const SBE = 1 << 5;
        const SO_DECL_LIST = 1 << 6;
        const STREAMOUT = 1 << 7;
        const RASTER = 1 << 8;
        const STATE_BASE_ADDRESS = 1 << 9;
        const WM = 1 << 10;
        const VF_SGVS = 1 << 11;
        const VERTEX_BUFFERS = 1 << 12;
        const VERTEX_ELEMENTS = 1 << 13;
        const PS_BLEND = 1 << 14;
        const PMA_FIX = 1 << 15;
        ///Gen4/5 fixed function programs.
        const GEN4_CLIP_PROG = 1 << 16;
        const GEN4_SF_PROG = 1 << 17;
        const GEN4_FF_GS_PROG = 1 << 18;
    }
}

bitflags! {
    ///Per stage dirty bits. Each group holds one bit per stage, in [Stage] order.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct StageDirtyFlags: u64 {
        const UNCOMPILED_VS = 1 << 0;
        const UNCOMPILED_TCS = 1 << 1;
        const UNCOMPILED_TES = 1 << 2;
        const UNCOMPILED_GS = 1 << 3;
        const UNCOMPILED_FS = 1 << 4;
        const UNCOMPILED_CS = 1 << 5;

        const BINDINGS_VS = 1 << 6;
        const BINDINGS_TCS = 1 << 7;
        const BINDINGS_TES = 1 << 8;
        const BINDINGS_GS = 1 << 9;
        const BINDINGS_FS = 1 << 10;
        const BINDINGS_CS = 1 << 11;

        const CONSTANTS_VS = 1 << 12;
        const CONSTANTS_TCS = 1 << 13;
        const CONSTANTS_TES = 1 << 14;
        const CONSTANTS_GS = 1 << 15;
        const CONSTANTS_FS = 1 << 16;
        const CONSTANTS_CS = 1 << 17;

        ///The bound variant changed.
        const VS = 1 << 18;
        const TCS = 1 << 19;
        const TES = 1 << 20;
        const GS = 1 << 21;
        const FS = 1 << 22;
        const CS = 1 << 23;

        const SAMPLER_STATES_VS = 1 << 24;
        const SAMPLER_STATES_TCS = 1 << 25;
        const SAMPLER_STATES_TES = 1 << 26;
        const SAMPLER_STATES_GS = 1 << 27;
        const SAMPLER_STATES_FS = 1 << 28;
        const SAMPLER_STATES_CS = 1 << 29;
    }
}

impl StageDirtyFlags {
    fn for_stage(first: Self, stage: Stage) -> Self {
        Self::from_bits_retain(first.bits() << stage.index())
    }

    pub fn uncompiled(stage: Stage) -> Self {
        Self::for_stage(Self::UNCOMPILED_VS, stage)
    }

    pub fn bindings(stage: Stage) -> Self {
        Self::for_stage(Self::BINDINGS_VS, stage)
    }

    pub fn constants(stage: Stage) -> Self {
        Self::for_stage(Self::CONSTANTS_VS, stage)
    }

    pub fn variant(stage: Stage) -> Self {
        Self::for_stage(Self::VS, stage)
    }

    pub fn sampler_states(stage: Stage) -> Self {
        Self::for_stage(Self::SAMPLER_STATES_VS, stage)
    }

    ///Everything that changes when a new variant is bound to `stage`.
    pub fn new_variant(stage: Stage) -> Self {
        Self::variant(stage) | Self::bindings(stage) | Self::constants(stage)
    }
}

bitflags! {
    ///Non-orthogonal state: pieces of context state a shader's variants depend on.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct NosFlags: u32 {
        const TEXTURES = 1 << 0;
        const RASTERIZER = 1 << 1;
        const FRAMEBUFFER = 1 << 2;
        const DEPTH_STENCIL_ALPHA = 1 << 3;
        const BLEND = 1 << 4;
        const LAST_VUE_MAP = 1 << 5;
        const VERTEX_ELEMENTS = 1 << 6;
    }
}

impl NosFlags {
    pub const COUNT: usize = 7;
}

///Gen4/5 only: NDC position in the VUE header. Not a real varying.
pub const BRW_VARYING_SLOT_NDC: u32 = 64;

pub const MAX_VIEWPORTS: u32 = 16;

///Layout of the vertex URB entry written by a geometry stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VueMap {
    ///Varyings the entry carries, including the header only ones (layer, viewport).
    pub slots_valid: u64,
    ///Separate shader objects: generic varyings live at fixed slots.
    pub separate: bool,
    pub slot_to_varying: Vec<u32>,
}

impl VueMap {
    pub fn compute(ver: u32, slots_valid: u64, separate: bool) -> Self {
        //Pre-gen6 has no geometry or tessellation that would need the SSO layout.
        let separate = separate && ver >= 6;
        let mut map = VueMap {
            slots_valid,
            separate,
            slot_to_varying: Vec::new(),
        };

        //Layer and viewport live in the header slot of PSIZ.
        let slots_valid = slots_valid & !(bit(VARYING_SLOT_LAYER) | bit(VARYING_SLOT_VIEWPORT));

        if ver < 6 {
            map.assign(VARYING_SLOT_PSIZ);
            map.assign(BRW_VARYING_SLOT_NDC);
            map.assign(VARYING_SLOT_POS);
        } else {
            map.assign(VARYING_SLOT_PSIZ);
            map.assign(VARYING_SLOT_POS);
            for varying in [VARYING_SLOT_CLIP_DIST0, VARYING_SLOT_CLIP_DIST1] {
                if slots_valid & bit(varying) != 0 {
                    map.assign(varying);
                }
            }
            //Front and back colours have to be adjacent for two sided colour swizzling.
            for varying in [VARYING_SLOT_COL0, VARYING_SLOT_BFC0, VARYING_SLOT_COL1, VARYING_SLOT_BFC1] {
                if slots_valid & bit(varying) != 0 {
                    map.assign(varying);
                }
            }
        }

        let builtins = slots_valid & (bit(VARYING_SLOT_VAR0) - 1);
        for varying in bits(builtins) {
            if map.varying_to_slot(varying).is_none() {
                map.assign(varying);
            }
        }

        let first_generic = map.slot_to_varying.len() as u32;
        for varying in bits(slots_valid & !(bit(VARYING_SLOT_VAR0) - 1)) {
            if separate {
                let slot = (first_generic + varying - VARYING_SLOT_VAR0) as usize;
                map.slot_to_varying.resize(slot, BRW_VARYING_SLOT_PAD);
            }
            map.assign(varying);
        }

        map
    }

    fn assign(&mut self, varying: u32) {
        self.slot_to_varying.push(varying);
    }

    pub fn num_slots(&self) -> u32 {
        self.slot_to_varying.len() as u32
    }

    pub fn varying_to_slot(&self, varying: u32) -> Option<u32> {
        self.slot_to_varying
            .iter()
            .position(|v| *v == varying)
            .map(|s| s as u32)
    }
}

///Unused slot in a separate layout.
pub const BRW_VARYING_SLOT_PAD: u32 = 65;

///Iterates the set bits of `mask`, lowest first.
pub fn bits(mut mask: u64) -> impl Iterator<Item = u32> {
    std::iter::from_fn(move || {
        if mask == 0 {
            None
        } else {
            let b = mask.trailing_zeros();
            mask &= mask - 1;
            Some(b)
        }
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TexFormat {
    #[default]
    Rgba8Unorm,
    R8Sint,
    R8Uint,
    R16Sint,
    R16Uint,
    R32g32Uint,
    R32g32Sint,
    R32g32Float,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerView {
    pub format: TexFormat,
    ///API swizzle, `0..=3` for xyzw, 4 for zero and 5 for one.
    pub swizzle: [u8; 4],
    pub is_buffer: bool,
}

impl Default for SamplerView {
    fn default() -> Self {
        SamplerView {
            format: TexFormat::default(),
            swizzle: [0, 1, 2, 3],
            is_buffer: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RasterizerState {
    ///Enabled user clip planes.
    pub clip_plane_enable: u8,
    pub flatshade: bool,
    ///Front or back faces are drawn as lines or points.
    pub unfilled: bool,
    pub clamp_fragment_color: bool,
    pub multisample: bool,
    pub force_persample_interp: bool,
    pub sprite_coord_enable: u8,
}

impl RasterizerState {
    ///Clip plane constants a shader needs to see. Planes are lowered up to the highest enabled one.
    pub fn num_clip_plane_consts(&self) -> u8 {
        (8 - self.clip_plane_enable.leading_zeros()) as u8
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FramebufferState {
    pub nr_cbufs: u8,
    pub samples: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlendState {
    pub alpha_to_coverage: bool,
    pub dual_color_blending: bool,
    pub blend_enables: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepthStencilAlphaState {
    pub alpha_enabled: bool,
}

///API state the program keys are built from.
#[derive(Clone, Debug, Default)]
pub struct DrawState {
    pub rasterizer: RasterizerState,
    pub framebuffer: FramebufferState,
    pub blend: BlendState,
    pub depth_stencil_alpha: DepthStencilAlphaState,
    ///Bound sampler views, per stage and unit.
    pub textures: [Vec<Option<SamplerView>>; 6],
    pub vertices_per_patch: u8,
}

///URB sizes the state emission last configured.
#[derive(Clone, Debug, Default)]
pub struct UrbState {
    ///Entry size per VUE stage, in [Stage] order.
    pub size: [u32; 4],
    ///The URB is full, shrinking an entry may free space for more threads.
    pub constrained: bool,
}
