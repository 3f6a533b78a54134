//! # Binding table setup
//!
//! Packs every surface a shader references (render targets, textures, UBOs, SSBOs, images, ...) into one compacted
//! binding table and rewrites the shader to use the final hardware indices.
//!
//! ## Implementation details
//!
//! - Pass 1: size each [SurfaceGroup]. Some sizes are known from the shader info (textures used, images, SSBOs),
//!   render targets come from draw state and the UBO group gets one slot more than there are constant buffers for
//!   shader constant data.
//! - Pass 2: mark used indices. A constant index marks its bit, an indirect one marks the whole group.
//! - Pass 3: assign offsets in group order. Each group takes `popcount(used)` consecutive entries.
//! - Pass 4: rewrite. Constant indices become `offset + rank`, indirect ones get the group offset added at runtime.
#![deny(warnings)]

use brw_ir::{patch::Patch, Shader};
use thiserror::Error;

mod group;
mod layout;
mod print;
mod rewrite;

pub use group::{
    group_mask, surface_src, SurfaceGroup, BRW_MAX_SOL_BINDINGS, SURFACE_GROUP_MAX_ELEMENTS,
    SURFACE_NOT_USED,
};
pub use layout::{
    compute_layout, BindingTable, BindingTableParams, GatherWorkarounds, WA_16BIT, WA_8BIT, WA_SIGN,
};
pub use print::print_binding_table;
pub use rewrite::apply_binding_table;

#[derive(Error, Debug)]
pub enum BindingTableError {
    #[error("Surface group {group} has {size} entries, at most 64 are supported")]
    GroupTooLarge { group: SurfaceGroup, size: u32 },
    #[error("Shader references {group} #{index}, but the group only has {size} entries")]
    IndexOutOfRange {
        group: SurfaceGroup,
        index: u32,
        size: u32,
    },
    #[error("Shader references surface group {group}, which has no entries")]
    EmptyGroup { group: SurfaceGroup },
    #[error("Indirect access into {group}, but not all of its surfaces are in the table")]
    PartialIndirectGroup { group: SurfaceGroup },
}

///Sets up the binding table of a shader and applies it.
///
/// After patching, [SetupBindingTable::table] holds the table the shader was rewritten for.
pub struct SetupBindingTable {
    pub params: BindingTableParams,
    ///Dumps the table to stderr after it was laid out.
    pub print: bool,
    pub table: BindingTable,
}

impl SetupBindingTable {
    pub fn new(params: BindingTableParams) -> Self {
        SetupBindingTable {
            params,
            print: false,
            table: BindingTable::default(),
        }
    }
}

impl Patch for SetupBindingTable {
    type Err = BindingTableError;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        let bt = compute_layout(&shader, &self.params)?;

        if self.print {
            if let Err(e) = print_binding_table(&mut std::io::stderr(), shader.stage.name(), &bt) {
                log::warn!("Could not print binding table: {}", e);
            }
        }

        apply_binding_table(&mut shader, &bt, &self.params)?;
        self.table = bt;
        Ok(shader)
    }
}
