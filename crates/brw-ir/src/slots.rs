//! Varying slot, fragment result and vertex attribute locations.
//!
//! Locations index the 64-bit `inputs_read` / `outputs_written` masks of [crate::ShaderInfo].

pub const VARYING_SLOT_POS: u32 = 0;
pub const VARYING_SLOT_COL0: u32 = 1;
pub const VARYING_SLOT_COL1: u32 = 2;
pub const VARYING_SLOT_FOGC: u32 = 3;
pub const VARYING_SLOT_TEX0: u32 = 4;
pub const VARYING_SLOT_PSIZ: u32 = 12;
pub const VARYING_SLOT_BFC0: u32 = 13;
pub const VARYING_SLOT_BFC1: u32 = 14;
pub const VARYING_SLOT_EDGE: u32 = 15;
pub const VARYING_SLOT_CLIP_VERTEX: u32 = 16;
pub const VARYING_SLOT_CLIP_DIST0: u32 = 17;
pub const VARYING_SLOT_CLIP_DIST1: u32 = 18;
pub const VARYING_SLOT_PRIMITIVE_ID: u32 = 22;
pub const VARYING_SLOT_LAYER: u32 = 23;
pub const VARYING_SLOT_VIEWPORT: u32 = 24;
pub const VARYING_SLOT_TESS_LEVEL_OUTER: u32 = 26;
pub const VARYING_SLOT_TESS_LEVEL_INNER: u32 = 27;
pub const VARYING_SLOT_VAR0: u32 = 32;

pub const FRAG_RESULT_DEPTH: u32 = 0;
pub const FRAG_RESULT_STENCIL: u32 = 1;
pub const FRAG_RESULT_COLOR: u32 = 2;
pub const FRAG_RESULT_SAMPLE_MASK: u32 = 3;
pub const FRAG_RESULT_DATA0: u32 = 4;

///Vertex attribute carrying the API edge flag.
pub const VERT_ATTRIB_EDGEFLAG: u32 = 31;

///Maximum number of colour draw buffers a fragment shader may write.
pub const MAX_DRAW_BUFFERS: u32 = 8;

///Varyings a fragment shader may read without needing the previous stage's VUE map.
pub const FS_VARYING_INPUT_MASK: u64 = !((1u64 << VARYING_SLOT_POS)
    | (1u64 << VARYING_SLOT_PSIZ)
    | (1u64 << VARYING_SLOT_EDGE)
    | (1u64 << VARYING_SLOT_CLIP_VERTEX));

#[inline]
pub const fn bit(location: u32) -> u64 {
    1u64 << location
}

///Mask of all the colour outputs a fragment shader can write.
pub const fn fs_color_bits() -> u64 {
    bit(FRAG_RESULT_COLOR) | (((1u64 << MAX_DRAW_BUFFERS) - 1) << FRAG_RESULT_DATA0)
}
