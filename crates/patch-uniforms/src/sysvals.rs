//! # System value remapping
//!
//! Gallium uploads user uniforms as constant buffer 0 and user UBOs behind it. Everything else a shader reads
//! from the driver (clip planes, default tessellation levels, image parameters, ...) is turned into a load from an
//! extra constant buffer placed after those. The driver fills that buffer from [UniformLayout::system_values] at
//! draw time.
//!
//! The extra buffer's index is only known once all loads were rewritten, so loads are emitted against a
//! placeholder undef and patched afterwards.

use ahash::AHashMap;
use brw_ir::{
    patch::{FoldConstants, Patch},
    verify::{validate, validate_unpatched},
    Builder, Instr, Intrinsic, Shader, Src, Ssa,
};
use serde::{Deserialize, Serialize};

use crate::RemapError;

///Max number of constant buffers a shader can bind.
pub const MAX_CONSTANT_BUFFERS: u32 = 16;

///Dwords of image parameters uploaded per image. Five vec4s.
pub const BRW_IMAGE_PARAM_SIZE: u32 = 20;

///Vec4 slot of each image parameter, together with its component count.
const IMAGE_PARAM_FIELDS: [(u32, u32); 5] = [
    //offset
    (0, 2),
    //size
    (2, 3),
    //stride
    (5, 4),
    //tiling
    (9, 3),
    //swizzling
    (12, 2),
];

///A driver provided value the shader reads from the system value buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemValue {
    Zero,
    ClipPlane { ucp: u8, comp: u8 },
    PatchVerticesIn,
    TessLevelOuter(u8),
    TessLevelInner(u8),
    ///Dword `dword` of the `brw_image_param` struct of `image`.
    ImageParam { image: u32, dword: u32 },
    WorkgroupSize(u8),
    WorkDim,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformLayout {
    pub system_values: Vec<SystemValue>,
    ///Constant buffers the shader binds, including cbuf0 and the system value buffer.
    pub num_cbufs: u32,
    pub sysval_cbuf: Option<u32>,
    ///Buffer shader constant data is read from. Always the one after the last counted cbuf.
    pub constant_data_cbuf: Option<u32>,
}

///Remaps system value reads into constant buffer loads.
pub struct SetupUniforms {
    ///Bytes of CS kernel input at the start of the system value buffer.
    pub kernel_input_size: u32,
    pub layout: UniformLayout,
}

impl SetupUniforms {
    pub fn new(kernel_input_size: u32) -> Self {
        SetupUniforms {
            kernel_input_size,
            layout: UniformLayout::default(),
        }
    }
}

#[derive(Default)]
struct Slots {
    values: Vec<SystemValue>,
    ucp: AHashMap<u32, u32>,
    image: AHashMap<u32, u32>,
    patch_vertices: Option<u32>,
    tess_outer: Option<u32>,
    tess_inner: Option<u32>,
    workgroup_size: Option<u32>,
    work_dim: Option<u32>,
}

impl Slots {
    fn alloc(&mut self, values: impl IntoIterator<Item = SystemValue>) -> u32 {
        let idx = self.values.len() as u32;
        self.values.extend(values);
        idx
    }

    fn alloc_image(&mut self, image: u32) -> u32 {
        let idx = self.values.len() as u32;
        for (dword, n) in IMAGE_PARAM_FIELDS {
            for i in 0..4 {
                self.values.push(if i < n {
                    SystemValue::ImageParam {
                        image,
                        dword: dword + i,
                    }
                } else {
                    SystemValue::Zero
                });
            }
        }
        idx
    }
}

impl Patch for SetupUniforms {
    type Err = RemapError;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        let start = align4(self.kernel_input_size);
        let mut slots = Slots::default();

        let instrs = std::mem::take(&mut shader.instrs);
        let constant_data_size = shader.constant_data.len() as u32;
        let sysval_ubo = shader.alloc_ssa();
        let const_ubo = shader.alloc_ssa();
        let mut uses_constant_data = false;
        let mut renamed: AHashMap<Ssa, Ssa> = AHashMap::default();

        {
            let mut b = Builder::new(&mut shader);
            b.push(Instr::Undef {
                dest: sysval_ubo,
                components: 1,
            });
            b.push(Instr::Undef {
                dest: const_ubo,
                components: 1,
            });

            for mut instr in instrs {
                for src in instr.srcs_mut() {
                    if let Src::Ssa(s) = src {
                        if let Some(new) = renamed.get(s) {
                            *src = Src::Ssa(*new);
                        }
                    }
                }

                let value_intrinsic = match &instr {
                    Instr::Intrinsic {
                        dest: Some(dest),
                        op,
                        srcs,
                        components,
                    } => Some((*dest, *op, srcs.first().copied(), *components)),
                    _ => None,
                };
                let (dest, op, src0, components) = match value_intrinsic {
                    Some(v) => v,
                    None => {
                        b.push(instr);
                        continue;
                    }
                };

                let offset: Src = match op {
                    //GL doesn't have a concept of base workgroup.
                    Intrinsic::LoadBaseWorkgroupId => {
                        let zero = b.imm_vec(&[0, 0, 0]);
                        renamed.insert(dest, zero);
                        continue;
                    }
                    //Reads the shader's constant data, not the system value buffer.
                    Intrinsic::LoadConstant { base } => {
                        let load_size = components as u32 * 4;
                        if load_size > constant_data_size {
                            return Err(RemapError::ConstantDataOutOfRange {
                                load_size,
                                size: constant_data_size,
                            });
                        }
                        let offset = b.iadd(src_or_zero(src0), base);
                        let offset = b.umin(offset, constant_data_size - load_size);
                        let load = b.load_ubo(const_ubo, offset, components);
                        renamed.insert(dest, load);
                        uses_constant_data = true;
                        continue;
                    }
                    Intrinsic::LoadUserClipPlane { ucp } => {
                        let idx = match slots.ucp.get(&ucp).copied() {
                            Some(idx) => idx,
                            None => {
                                let idx = slots.alloc((0..4).map(|comp| SystemValue::ClipPlane {
                                    ucp: ucp as u8,
                                    comp,
                                }));
                                slots.ucp.insert(ucp, idx);
                                idx
                            }
                        };
                        Src::Const(start + idx * 4)
                    }
                    Intrinsic::LoadPatchVerticesIn => {
                        let idx = match slots.patch_vertices {
                            Some(idx) => idx,
                            None => slots.alloc([SystemValue::PatchVerticesIn]),
                        };
                        slots.patch_vertices = Some(idx);
                        Src::Const(start + idx * 4)
                    }
                    Intrinsic::LoadTessLevelOuterDefault => {
                        let idx = match slots.tess_outer {
                            Some(idx) => idx,
                            None => slots.alloc((0..4).map(SystemValue::TessLevelOuter)),
                        };
                        slots.tess_outer = Some(idx);
                        Src::Const(start + idx * 4)
                    }
                    Intrinsic::LoadTessLevelInnerDefault => {
                        let idx = match slots.tess_inner {
                            Some(idx) => idx,
                            None => slots.alloc((0..2).map(SystemValue::TessLevelInner)),
                        };
                        slots.tess_inner = Some(idx);
                        Src::Const(start + idx * 4)
                    }
                    Intrinsic::ImageLoadParam {
                        binding,
                        array_len,
                        param,
                    } => {
                        let num_images = array_len.max(1);
                        if !slots.image.contains_key(&binding) {
                            for i in 0..num_images {
                                let img = binding + i;
                                let idx = slots.alloc_image(img);
                                slots.image.insert(img, idx);
                            }
                        }
                        let base_idx = slots.image.get(&binding).copied().unwrap_or(0);

                        //Clamp the array index, out of bounds surface accesses can hang the GPU.
                        let elem_size = BRW_IMAGE_PARAM_SIZE * 4;
                        let array_offset = b.imul(src_or_zero(src0), elem_size);
                        let array_offset = b.umin(array_offset, (num_images - 1) * elem_size);
                        Src::Ssa(b.iadd(array_offset, start + base_idx * 4 + param * 16))
                    }
                    Intrinsic::LoadWorkgroupSize => {
                        if !b.shader().info.workgroup_size_variable {
                            return Err(RemapError::FixedWorkgroupSize);
                        }
                        let idx = match slots.workgroup_size {
                            Some(idx) => idx,
                            None => slots.alloc((0..3).map(SystemValue::WorkgroupSize)),
                        };
                        slots.workgroup_size = Some(idx);
                        Src::Const(start + idx * 4)
                    }
                    Intrinsic::LoadWorkDim => {
                        let idx = match slots.work_dim {
                            Some(idx) => idx,
                            None => slots.alloc([SystemValue::WorkDim]),
                        };
                        slots.work_dim = Some(idx);
                        Src::Const(start + idx * 4)
                    }
                    Intrinsic::LoadKernelInput { base, range } => {
                        if base + range > self.kernel_input_size {
                            return Err(RemapError::KernelInputOutOfRange {
                                base,
                                range,
                                size: self.kernel_input_size,
                            });
                        }
                        Src::Ssa(b.iadd(src_or_zero(src0), base))
                    }
                    _ => {
                        b.push(instr);
                        continue;
                    }
                };

                let load = b.load_ubo(sysval_ubo, offset, components);
                renamed.insert(dest, load);
            }
        }

        validate_unpatched(&shader, "before remapping")?;

        //Uniforms are stored in constant buffer 0, the user-facing UBOs are indexed by one. So if any constant
        // buffer is needed, the constant buffer 0 will be needed, so account for it.
        let mut num_cbufs = shader.info.num_ubos;
        if num_cbufs > 0 || shader.num_uniforms > 0 {
            num_cbufs += 1;
        }

        let mut sysval_cbuf = None;
        if !slots.values.is_empty() || self.kernel_input_size > 0 {
            sysval_cbuf = Some(num_cbufs);
            patch_ubo_index(&mut shader, sysval_ubo, num_cbufs);
            num_cbufs += 1;
        }

        if num_cbufs >= MAX_CONSTANT_BUFFERS {
            return Err(RemapError::TooManyConstantBuffers(num_cbufs));
        }

        //Constant data goes behind all the other buffers.
        let constant_data_cbuf = if uses_constant_data {
            patch_ubo_index(&mut shader, const_ubo, num_cbufs);
            Some(num_cbufs)
        } else {
            None
        };

        shader
            .instrs
            .retain(|i| i.dest() != Some(sysval_ubo) && i.dest() != Some(const_ubo));

        //Fold the new iadds for the UBO range analysis.
        let mut shader = match FoldConstants::new().patch_shader(shader) {
            Ok(shader) => shader,
            Err(never) => match never {},
        };
        validate(&shader, "after remap")?;

        //Uniform storage is no longer used, the backend would otherwise try to pack it.
        shader.num_uniforms = 0;

        log::trace!(
            "{} shader: {} system values, {} cbufs",
            shader.stage.name(),
            slots.values.len(),
            num_cbufs
        );

        self.layout = UniformLayout {
            system_values: slots.values,
            num_cbufs,
            sysval_cbuf,
            constant_data_cbuf,
        };
        Ok(shader)
    }
}

fn align4(v: u32) -> u32 {
    (v + 3) & !3
}

fn src_or_zero(src: Option<Src>) -> Src {
    src.unwrap_or(Src::Const(0))
}

///Rewrites every load_ubo reading buffer `placeholder` to read buffer `index`.
fn patch_ubo_index(shader: &mut Shader, placeholder: Ssa, index: u32) {
    for instr in shader.instrs.iter_mut() {
        if let Instr::Intrinsic {
            op: Intrinsic::LoadUbo,
            srcs,
            ..
        } = instr
        {
            if srcs[0] == Src::Ssa(placeholder) {
                srcs[0] = Src::Const(index);
            }
        }
    }
}
