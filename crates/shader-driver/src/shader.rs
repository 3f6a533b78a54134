//! Uncompiled shaders and their variant lists.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use brw_ir::{
    slots::{VARYING_SLOT_LAYER, VARYING_SLOT_PSIZ, VARYING_SLOT_VIEWPORT},
    Shader, Stage,
};
use patch_binding_table::BindingTable;
use patch_uniforms::SystemValue;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use variant_cache::{CompileFence, KernelRef};

use crate::{
    backend::ProgData,
    keys::ShaderKey,
    state::{bits, NosFlags, VueMap},
};

pub const MAX_SO_BUFFERS: usize = 4;

///One captured output of a stream output declaration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOutput {
    ///Before [update_so_info]: index into the written outputs. After: the varying slot.
    pub register_index: u32,
    pub start_component: u8,
    pub num_components: u8,
    pub output_buffer: u8,
    ///Dword offset into the buffer.
    pub dst_offset: u16,
    pub stream: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOutputInfo {
    pub outputs: SmallVec<[StreamOutput; 8]>,
    ///Dword stride of each buffer.
    pub stride: [u16; MAX_SO_BUFFERS],
}

///Turns the output indices of `so_info` into varying slots.
///
/// Layer, viewport index and point size share the VUE header, they are captured from the matching
/// component of the point size slot.
pub fn update_so_info(so_info: &mut StreamOutputInfo, outputs_written: u64) {
    let reverse_map: Vec<u32> = bits(outputs_written).collect();

    for output in so_info.outputs.iter_mut() {
        let Some(&varying) = reverse_map.get(output.register_index as usize) else {
            log::warn!(
                "Stream output references output #{}, but only {} outputs are written",
                output.register_index,
                reverse_map.len()
            );
            continue;
        };
        output.register_index = varying;

        match varying {
            VARYING_SLOT_LAYER => {
                output.register_index = VARYING_SLOT_PSIZ;
                output.start_component = 1;
            }
            VARYING_SLOT_VIEWPORT => {
                output.register_index = VARYING_SLOT_PSIZ;
                output.start_component = 2;
            }
            VARYING_SLOT_PSIZ => output.start_component = 3,
            _ => {}
        }
    }
}

///A 3DSTATE_SO_DECL entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoDecl {
    pub stream: u8,
    pub output_buffer: u8,
    ///VUE slot the data is read from.
    pub register_index: u32,
    pub component_mask: u8,
    ///Skips `component_mask` components in the buffer instead of writing them.
    pub hole_flag: bool,
}

///Builds the SO_DECL list of the last geometry stage. Gaps in the output buffers become holes.
pub fn create_so_decl_list(so_info: &StreamOutputInfo, vue_map: &VueMap) -> Vec<SoDecl> {
    let mut next_offset = [0u16; MAX_SO_BUFFERS];
    let mut decls = Vec::with_capacity(so_info.outputs.len());

    for output in so_info.outputs.iter() {
        let buffer = output.output_buffer as usize % MAX_SO_BUFFERS;

        let mut skip = output.dst_offset.saturating_sub(next_offset[buffer]);
        while skip > 0 {
            decls.push(SoDecl {
                stream: output.stream,
                output_buffer: output.output_buffer,
                register_index: 0,
                component_mask: (1u8 << skip.min(4)) - 1,
                hole_flag: true,
            });
            skip = skip.saturating_sub(4);
        }
        next_offset[buffer] = output.dst_offset + output.num_components as u16;

        let Some(slot) = vue_map.varying_to_slot(output.register_index) else {
            log::warn!("Stream output of varying {} which is not in the VUE", output.register_index);
            continue;
        };
        decls.push(SoDecl {
            stream: output.stream,
            output_buffer: output.output_buffer,
            register_index: slot,
            component_mask: ((1u8 << output.num_components.min(4)) - 1) << output.start_component,
            hole_flag: false,
        });
    }

    decls
}

///A compiled variant, ready to be bound.
#[derive(Debug)]
pub struct CompiledShader {
    pub stage: Stage,
    pub key: ShaderKey,
    pub kernel: KernelRef,
    pub prog_data: ProgData,
    pub streamout: Option<Vec<SoDecl>>,
    pub system_values: Vec<SystemValue>,
    pub kernel_input_size: u32,
    pub num_cbufs: u32,
    pub bt: BindingTable,
}

///Everything needed to recreate a [CompiledShader] without the backend.
#[derive(Serialize, Deserialize)]
pub(crate) struct DiskEntry {
    pub assembly: Vec<u8>,
    pub prog_data: ProgData,
    pub streamout: Option<Vec<SoDecl>>,
    pub system_values: Vec<SystemValue>,
    pub kernel_input_size: u32,
    pub num_cbufs: u32,
    pub bt: BindingTable,
}

///A variant of an uncompiled shader. May still be compiling.
pub struct Variant {
    pub key: ShaderKey,
    ready: CompileFence,
    compiled: OnceLock<Arc<CompiledShader>>,
}

impl Variant {
    pub fn new(key: ShaderKey) -> Self {
        Variant {
            key,
            ready: CompileFence::new(),
            compiled: OnceLock::new(),
        }
    }

    ///Publishes the compile result and wakes up waiters. `None` marks the variant as failed for good.
    pub fn complete(&self, shader: Option<Arc<CompiledShader>>) {
        let success = match shader {
            Some(shader) => self.compiled.set(shader).is_ok(),
            None => false,
        };
        self.ready.signal(success);
    }

    ///Blocks until compiled.
    pub fn wait(&self) -> Option<Arc<CompiledShader>> {
        if self.ready.wait() {
            self.compiled.get().cloned()
        } else {
            None
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_signalled()
    }

    pub fn compilation_failed(&self) -> bool {
        self.ready.is_signalled() && self.compiled.get().is_none()
    }
}

///Variants of one shader.
///
/// New variants are only ever appended. The first entry is written once and can be checked without locking,
/// which is the common case since it usually holds the precompiled variant.
#[derive(Default)]
pub struct VariantList {
    first: OnceLock<Arc<Variant>>,
    rest: Mutex<Vec<Arc<Variant>>>,
}

impl VariantList {
    pub fn new() -> Self {
        Self::default()
    }

    ///Finds the variant for `key`, or appends a new, still pending one.
    ///
    /// Returns whether the variant was added. Whoever added it is responsible for compiling it and calling
    /// [Variant::complete], everyone else blocks here until that happened.
    pub fn find_or_add(&self, key: &ShaderKey) -> (Arc<Variant>, bool) {
        if let Some(first) = self.first.get() {
            if first.key == *key {
                first.wait();
                return (first.clone(), false);
            }
        }

        let found = {
            let mut rest = self.rest.lock().unwrap_or_else(PoisonError::into_inner);

            let existing = match self.first.get() {
                Some(first) if first.key == *key => Some(first.clone()),
                _ => rest.iter().find(|v| v.key == *key).cloned(),
            };

            match existing {
                Some(v) => v,
                None => {
                    let variant = Arc::new(Variant::new(key.clone()));
                    //`first` is only set under the lock, failing means it is already taken.
                    if let Err(variant) = self.first.set(variant.clone()) {
                        rest.push(variant);
                    }
                    return (variant, true);
                }
            }
        };

        found.wait();
        (found, false)
    }

    pub fn first(&self) -> Option<Arc<Variant>> {
        self.first.get().cloned()
    }

    pub fn len(&self) -> usize {
        let rest = self.rest.lock().unwrap_or_else(PoisonError::into_inner).len();
        rest + usize::from(self.first.get().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.first.get().is_none()
    }
}

///A shader as handed to the driver, before any state dependent compile.
pub struct UncompiledShader {
    pub program_id: u32,
    pub nir: Shader,
    pub stream_output: StreamOutputInfo,
    ///State the variants depend on.
    pub nos: NosFlags,
    pub source_hash: [u8; 32],
    ///Compute only: bytes of kernel input.
    pub kernel_input_size: u32,
    ///The VS reads the API edge flag.
    pub needs_edge_flag: bool,
    pub variants: VariantList,
}

impl UncompiledShader {
    pub fn stage(&self) -> Stage {
        self.nir.stage
    }
}
