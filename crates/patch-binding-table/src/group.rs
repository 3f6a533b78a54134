use brw_ir::Intrinsic;
use serde::{Deserialize, Serialize};

///Binding table index of a surface that isn't present in the compacted table.
pub const SURFACE_NOT_USED: u32 = 0xa0a0_a0a0;

///Max elements in a surface group.
pub const SURFACE_GROUP_MAX_ELEMENTS: u32 = 64;

///Number of streamout surfaces a gen6 geometry shader reserves.
pub const BRW_MAX_SOL_BINDINGS: u32 = 64;

///Kinds of surfaces a shader can reference. The declaration order is the order in which groups are laid out in
/// the binding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SurfaceGroup {
    RenderTarget,
    ///Non-coherent framebuffer fetch.
    RenderTargetRead,
    Sol,
    CsWorkGroups,
    Texture,
    ///Pre-gen8 gathers go through their own surface states.
    TextureGather,
    Ubo,
    Ssbo,
    Image,
}

impl SurfaceGroup {
    pub const COUNT: usize = 9;

    pub const ALL: [SurfaceGroup; Self::COUNT] = [
        SurfaceGroup::RenderTarget,
        SurfaceGroup::RenderTargetRead,
        SurfaceGroup::Sol,
        SurfaceGroup::CsWorkGroups,
        SurfaceGroup::Texture,
        SurfaceGroup::TextureGather,
        SurfaceGroup::Ubo,
        SurfaceGroup::Ssbo,
        SurfaceGroup::Image,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SurfaceGroup::RenderTarget => "render target",
            SurfaceGroup::RenderTargetRead => "non-coherent render target read",
            SurfaceGroup::Sol => "streamout",
            SurfaceGroup::CsWorkGroups => "CS work groups",
            SurfaceGroup::Texture => "texture",
            SurfaceGroup::TextureGather => "texture gather",
            SurfaceGroup::Ubo => "ubo",
            SurfaceGroup::Ssbo => "ssbo",
            SurfaceGroup::Image => "image",
        }
    }
}

impl std::fmt::Display for SurfaceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

///Mask with the lower `size` bits set.
#[inline]
pub fn group_mask(size: u32) -> u64 {
    if size >= 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

///Returns which source of `op` holds a surface index, and into which group it points.
///
/// `ver` is needed since framebuffer reads only go through the binding table on gen6+.
pub fn surface_src(op: &Intrinsic, ver: u32) -> Option<(usize, SurfaceGroup)> {
    match op {
        Intrinsic::ImageLoad
        | Intrinsic::ImageStore
        | Intrinsic::ImageSize
        | Intrinsic::ImageAtomic => Some((0, SurfaceGroup::Image)),
        Intrinsic::LoadUbo => Some((0, SurfaceGroup::Ubo)),
        Intrinsic::StoreSsbo => Some((1, SurfaceGroup::Ssbo)),
        Intrinsic::LoadSsbo | Intrinsic::GetSsboSize | Intrinsic::SsboAtomic => {
            Some((0, SurfaceGroup::Ssbo))
        }
        Intrinsic::LoadOutput { .. } if ver >= 6 => Some((0, SurfaceGroup::RenderTargetRead)),
        _ => None,
    }
}
