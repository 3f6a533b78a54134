//! Group sizing, usage marking and offset assignment.

use brw_ir::{Instr, Intrinsic, Shader, Src, Stage};
use serde::{Deserialize, Serialize};

use crate::{
    group::{group_mask, surface_src, SurfaceGroup, BRW_MAX_SOL_BINDINGS, SURFACE_GROUP_MAX_ELEMENTS},
    BindingTableError, SURFACE_NOT_USED,
};

///Gather workaround selector bits, per texture unit.
pub const WA_SIGN: u8 = 1;
pub const WA_8BIT: u8 = 2;
pub const WA_16BIT: u8 = 4;

///Texture gather fixups that have to be applied while texture indices are rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatherWorkarounds {
    ///Ivybridge: units whose gathers of channel 1 have to read channel 2 instead.
    pub channel_quirk_mask: u32,
    ///Sandybridge: per unit combination of `WA_*` bits.
    pub gfx6_gather_wa: [u8; 32],
}

#[derive(Clone, Debug, Default)]
pub struct BindingTableParams {
    pub ver: u32,
    pub verx10: u32,
    ///Render targets of a fragment shader. Ignored for other stages.
    pub num_render_targets: u32,
    ///Constant buffers after system value remapping.
    pub num_cbufs: u32,
    ///Marks every declared slot as used.
    pub disable_compaction: bool,
    pub gather: GatherWorkarounds,
}

///Compacted mapping from `(group, index)` to hardware binding table indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingTable {
    pub sizes: [u32; SurfaceGroup::COUNT],
    pub used_mask: [u64; SurfaceGroup::COUNT],
    pub offsets: [u32; SurfaceGroup::COUNT],
    pub size_bytes: u32,
}

impl BindingTable {
    pub fn size(&self, group: SurfaceGroup) -> u32 {
        self.sizes[group.index()]
    }

    pub fn used(&self, group: SurfaceGroup) -> u64 {
        self.used_mask[group.index()]
    }

    pub fn offset(&self, group: SurfaceGroup) -> u32 {
        self.offsets[group.index()]
    }

    ///Sum of all declared group sizes.
    pub fn declared_entries(&self) -> u32 {
        self.sizes.iter().sum()
    }

    ///Entries actually present in the table.
    pub fn compacted_entries(&self) -> u32 {
        self.size_bytes / 4
    }

    ///Map a `<group, index>` pair to a binding table index.
    ///
    ///For example: `<Ubo, 5>` => binding table index 12
    pub fn group_index_to_bti(&self, group: SurfaceGroup, index: u32) -> u32 {
        if index >= self.size(group) {
            return SURFACE_NOT_USED;
        }
        let mask = self.used(group);
        let bit = 1u64 << index;
        if bit & mask != 0 {
            self.offset(group) + ((bit - 1) & mask).count_ones()
        } else {
            SURFACE_NOT_USED
        }
    }

    ///Map a binding table index back to the index within `group`.
    ///
    ///For example: binding table index 12 => `<Ubo, 5>`
    pub fn bti_to_group_index(&self, group: SurfaceGroup, bti: u32) -> u32 {
        let offset = self.offset(group);
        if bti < offset {
            return SURFACE_NOT_USED;
        }

        let mut remaining = bti - offset;
        let mut mask = self.used(group);
        while mask != 0 {
            let index = mask.trailing_zeros();
            mask &= mask - 1;
            if remaining == 0 {
                return index;
            }
            remaining -= 1;
        }
        SURFACE_NOT_USED
    }

    fn mark_used(&mut self, group: SurfaceGroup, index: Option<u32>) -> Result<(), BindingTableError> {
        let size = self.size(group);
        if size == 0 {
            return Err(BindingTableError::EmptyGroup { group });
        }

        match index {
            Some(index) => {
                if index >= size {
                    return Err(BindingTableError::IndexOutOfRange { group, index, size });
                }
                self.used_mask[group.index()] |= 1u64 << index;
            }
            //There's an indirect usage, we need all the surfaces.
            None => self.used_mask[group.index()] = group_mask(size),
        }
        Ok(())
    }
}

///Bitset "last bit": index of the highest set bit plus one.
fn last_bit(mask: u64) -> u32 {
    64 - mask.leading_zeros()
}

///Sizes the groups of `shader`, marks what it uses and assigns offsets. The shader itself is not touched.
pub fn compute_layout(shader: &Shader, params: &BindingTableParams) -> Result<BindingTable, BindingTableError> {
    let info = &shader.info;
    let mut bt = BindingTable::default();

    let mut set = |group: SurfaceGroup, size: u32, used: u64| {
        bt.sizes[group.index()] = size;
        bt.used_mask[group.index()] = used;
    };

    //For some groups we already know upfront how many will be used.
    match shader.stage {
        Stage::Fragment => {
            let rts = params.num_render_targets;
            set(SurfaceGroup::RenderTarget, rts, group_mask(rts));
            if params.ver >= 6 && info.outputs_read != 0 {
                set(SurfaceGroup::RenderTargetRead, rts, group_mask(rts));
            }
        }
        Stage::Compute => set(SurfaceGroup::CsWorkGroups, 1, 0),
        Stage::Geometry if params.ver == 6 => {
            set(SurfaceGroup::Sol, BRW_MAX_SOL_BINDINGS, u64::MAX);
        }
        _ => {}
    }

    let textures = last_bit(info.textures_used);
    set(SurfaceGroup::Texture, textures, info.textures_used);
    if info.uses_texture_gather && params.ver < 8 {
        set(SurfaceGroup::TextureGather, textures, info.textures_used);
    }
    set(SurfaceGroup::Image, info.num_images, 0);
    //One extra slot at the end for shader constant data. Compaction drops it if unused.
    set(SurfaceGroup::Ubo, params.num_cbufs + 1, 0);
    set(SurfaceGroup::Ssbo, info.num_ssbos, 0);

    for group in SurfaceGroup::ALL {
        let size = bt.size(group);
        if size > SURFACE_GROUP_MAX_ELEMENTS {
            return Err(BindingTableError::GroupTooLarge { group, size });
        }
    }

    let consts = shader.scalar_consts();
    let as_const = |src: &Src| match src {
        Src::Const(c) => Some(*c),
        Src::Ssa(s) => consts.get(s).copied(),
    };

    for instr in &shader.instrs {
        let (op, srcs) = match instr {
            Instr::Intrinsic { op, srcs, .. } => (op, srcs),
            _ => continue,
        };

        if *op == Intrinsic::LoadNumWorkgroups {
            bt.used_mask[SurfaceGroup::CsWorkGroups.index()] = 1;
            continue;
        }

        if let Some((src_idx, group)) = surface_src(op, params.ver) {
            bt.mark_used(group, as_const(&srcs[src_idx]))?;
        }
    }

    if params.disable_compaction {
        for group in SurfaceGroup::ALL {
            bt.used_mask[group.index()] = group_mask(bt.size(group));
        }
    }

    //From here on group indices and binding table indices can be converted.
    let mut next = 0;
    for group in SurfaceGroup::ALL {
        let used = bt.used(group);
        if used != 0 {
            bt.offsets[group.index()] = next;
            next += used.count_ones();
        }
    }
    bt.size_bytes = next * 4;

    log::trace!(
        "{} binding table: {} of {} entries",
        shader.stage.name(),
        next,
        bt.declared_entries()
    );
    Ok(bt)
}
