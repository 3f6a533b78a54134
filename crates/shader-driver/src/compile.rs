//! Per stage compile pipeline.
//!
//! Every variant starts from a copy of the uncompiled IR. The key decides which lowering passes run, then uniforms
//! and the binding table are set up and the result goes to the backend. The shared IR is never modified.

use std::{convert::Infallible, sync::Arc};

use brw_ir::{
    patch::{ClampPointSize, DefaultEdgeFlag, LowerClipPlanes, LowerFsOutputs, LowerTexSwizzle, Patch},
    slots::{
        bit, VARYING_SLOT_BFC0, VARYING_SLOT_BFC1, VARYING_SLOT_CLIP_DIST0, VARYING_SLOT_CLIP_DIST1,
        VARYING_SLOT_COL0, VARYING_SLOT_COL1, VARYING_SLOT_EDGE, VARYING_SLOT_TESS_LEVEL_INNER,
        VARYING_SLOT_TESS_LEVEL_OUTER, VARYING_SLOT_TEX0, VERT_ATTRIB_EDGEFLAG,
    },
    Builder, Instr, Intrinsic, Shader, Stage,
};
use patch_binding_table::{BindingTableParams, SetupBindingTable};
use patch_uniforms::{analyze_ubo_ranges, SetupUniforms, UboAnalysis};
use smallvec::SmallVec;

use crate::{
    backend::CompileParams,
    keys::{ShaderKey, TcsKey, VsKey},
    screen::Screen,
    shader::{create_so_decl_list, CompiledShader, DiskEntry, UncompiledShader},
    state::{bits, VueMap},
    DriverError,
};

///Mask of planes `0..n`.
fn ucp_mask(nr_userclip_plane_consts: u8) -> u8 {
    ((1u16 << nr_userclip_plane_consts.min(8)) - 1) as u8
}

///Outputs a vertex shader has VUE slots for. Pre-gen6 hardware needs a few extra ones for the fixed function units.
fn vs_outputs_written(ver: u32, key: &VsKey, user_varyings: u64) -> u64 {
    let mut outputs_written = user_varyings;

    if ver < 6 {
        if key.copy_edgeflag {
            outputs_written |= bit(VARYING_SLOT_EDGE);
        }
        //The SF writes replaced sprite coordinates into these.
        for i in 0..8 {
            if key.point_coord_replace & (1 << i) != 0 {
                outputs_written |= bit(VARYING_SLOT_TEX0 + i);
            }
        }
        if outputs_written & bit(VARYING_SLOT_BFC0) != 0 {
            outputs_written |= bit(VARYING_SLOT_COL0);
        }
        if outputs_written & bit(VARYING_SLOT_BFC1) != 0 {
            outputs_written |= bit(VARYING_SLOT_COL1);
        }
    }

    //Legacy clipping needs the clip distance slots even if the shader doesn't write them.
    if key.nr_userclip_plane_consts > 0 {
        outputs_written |= bit(VARYING_SLOT_CLIP_DIST0) | bit(VARYING_SLOT_CLIP_DIST1);
    }

    outputs_written
}

///TCS used when only a TES is bound. Copies every per vertex output through and writes the default
/// tessellation levels.
pub(crate) fn passthrough_tcs(key: &TcsKey) -> Shader {
    let mut nir = Shader::new(Stage::TessCtrl);
    nir.info.name = Some("passthrough TCS".to_owned());
    nir.info.tess.primitive_mode = key.tes_primitive_mode;
    nir.info.tess.tcs_vertices_out = key.input_vertices;

    let tess_levels = bit(VARYING_SLOT_TESS_LEVEL_OUTER) | bit(VARYING_SLOT_TESS_LEVEL_INNER);
    let mut b = Builder::new(&mut nir);
    for location in bits(key.outputs_written & !tess_levels) {
        let value = b.load_input(location, 4);
        b.store_output(location, 0, value);
    }

    let outer = b.load(Intrinsic::LoadTessLevelOuterDefault, &[], 4);
    b.store_output(VARYING_SLOT_TESS_LEVEL_OUTER, 0, outer);
    let inner = b.load(Intrinsic::LoadTessLevelInnerDefault, &[], 2);
    b.store_output(VARYING_SLOT_TESS_LEVEL_INNER, 0, inner);
    nir.info.patch_outputs_written = key.patch_outputs_written;

    nir
}

///Replaces workgroup size loads with the declared size, only variable sizes are read from constants.
struct LowerWorkgroupSize;

impl Patch for LowerWorkgroupSize {
    type Err = Infallible;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        if shader.info.workgroup_size_variable {
            return Ok(shader);
        }

        let size = shader.info.workgroup_size.map(u32::from);
        for instr in shader.instrs.iter_mut() {
            let dest = match instr {
                Instr::Intrinsic {
                    dest: Some(dest),
                    op: Intrinsic::LoadWorkgroupSize,
                    ..
                } => *dest,
                _ => continue,
            };
            *instr = Instr::LoadConst {
                dest,
                values: SmallVec::from_slice(&size),
            };
        }
        Ok(shader)
    }
}

///Lowering that depends on the key and has to happen before uniforms are set up.
fn lower_for_key(nir: Shader, key: &ShaderKey) -> Result<Shader, DriverError> {
    let patcher = nir.patch();
    let patcher = match key {
        ShaderKey::Vs(vs) => {
            let mut patcher = patcher;
            if vs.nr_userclip_plane_consts > 0 {
                patcher = patcher.patch(LowerClipPlanes::new(ucp_mask(vs.nr_userclip_plane_consts)))?;
            }
            if vs.clamp_pointsize {
                patcher = patcher.patch(ClampPointSize::hw_limits())?;
            }
            patcher
        }
        ShaderKey::Tes(tes) if tes.nr_userclip_plane_consts > 0 => {
            patcher.patch(LowerClipPlanes::new(ucp_mask(tes.nr_userclip_plane_consts)))?
        }
        ShaderKey::Gs(gs) if gs.nr_userclip_plane_consts > 0 => {
            patcher.patch(LowerClipPlanes::new(ucp_mask(gs.nr_userclip_plane_consts)))?
        }
        ShaderKey::Cs(_) => patcher.patch(LowerWorkgroupSize)?,
        _ => patcher,
    };
    Ok(patcher.unwrap_shader())
}

///Compiles the variant of `ish` for `key` and puts it into the program cache.
///
/// Without an `ish` the passthrough TCS for a TCS key is compiled.
pub(crate) fn compile_variant(
    screen: &Screen,
    ish: Option<&UncompiledShader>,
    key: &ShaderKey,
    input_vue_map: Option<&VueMap>,
) -> Result<Arc<CompiledShader>, DriverError> {
    let stage = key.stage();
    let devinfo = screen.devinfo;

    let (nir, source_hash) = match (ish, key) {
        (Some(ish), _) => (ish.nir.clone(), ish.source_hash),
        (None, ShaderKey::Tcs(tcs)) => {
            let nir = passthrough_tcs(tcs);
            let hash = nir.source_hash()?;
            (nir, hash)
        }
        (None, _) => return Err(DriverError::MissingShader { stage }),
    };
    let kernel_input_size = ish.map_or(0, |ish| ish.kernel_input_size);

    let nir = lower_for_key(nir, key)?;

    let mut uniforms = SetupUniforms::new(kernel_input_size);
    let mut patcher = nir.patch().patch_ref(&mut uniforms)?;
    if stage == Stage::Fragment {
        //Has to happen before the binding table, framebuffer fetches become render target reads.
        patcher = patcher.patch(LowerFsOutputs::default())?;
    }
    patcher = patcher.patch(LowerTexSwizzle::new(key.base().tex.swizzles))?;
    if stage == Stage::Vertex
        && devinfo.ver <= 5
        && patcher.shader().info.inputs_read & bit(VERT_ATTRIB_EDGEFLAG) == 0
    {
        patcher = patcher.patch(DefaultEdgeFlag)?;
    }

    let num_render_targets = match key {
        ShaderKey::Fs(fs) => u32::from(fs.nr_color_regions).max(1),
        _ => 0,
    };
    let mut bt = SetupBindingTable::new(BindingTableParams {
        ver: devinfo.ver,
        verx10: devinfo.verx10,
        num_render_targets,
        num_cbufs: uniforms.layout.num_cbufs,
        disable_compaction: screen.config.disable_compact_binding_table,
        gather: key.base().tex.gather_workarounds(),
    });
    bt.print = screen.config.debug_bt;
    let nir = patcher.patch_ref(&mut bt)?.unwrap_shader();

    let ubo = if devinfo.can_push_ubo() {
        analyze_ubo_ranges(&nir)
    } else {
        UboAnalysis::default()
    };

    let separate = nir.info.separate_shader;
    let vue_map = match key {
        ShaderKey::Vs(vs) => Some(VueMap::compute(
            devinfo.ver,
            vs_outputs_written(devinfo.ver, vs, nir.info.outputs_written),
            separate,
        )),
        ShaderKey::Tcs(_) => Some(VueMap::compute(devinfo.ver, nir.info.outputs_written, false)),
        ShaderKey::Tes(_) | ShaderKey::Gs(_) => {
            Some(VueMap::compute(devinfo.ver, nir.info.outputs_written, separate))
        }
        ShaderKey::Fs(_) | ShaderKey::Cs(_) => None,
    };

    let sanitized = key.sanitized();
    let params = CompileParams {
        shader: &nir,
        key: &sanitized,
        source_hash,
        vue_map: vue_map.as_ref(),
        input_vue_map: if stage == Stage::Fragment { input_vue_map } else { None },
    };
    let backend = &screen.backend;
    let compiled = match stage {
        Stage::Vertex => backend.compile_vs(&params),
        Stage::TessCtrl => backend.compile_tcs(&params),
        Stage::TessEval => backend.compile_tes(&params),
        Stage::Geometry => backend.compile_gs(&params),
        Stage::Fragment => backend.compile_fs(&params),
        Stage::Compute => backend.compile_cs(&params),
    }
    .map_err(|message| DriverError::Compile { stage, message })?;

    let mut prog_data = compiled.prog_data;
    prog_data.ubo_ranges = ubo.ranges;
    if let (Some(vue), Some(map)) = (prog_data.stage.vue_mut(), vue_map.as_ref()) {
        vue.vue_map = map.clone();
    }

    let streamout = match (ish, vue_map.as_ref()) {
        (Some(ish), Some(map))
            if devinfo.ver >= 7
                && matches!(stage, Stage::Vertex | Stage::TessEval | Stage::Geometry)
                && !ish.stream_output.outputs.is_empty() =>
        {
            Some(create_so_decl_list(&ish.stream_output, map))
        }
        _ => None,
    };

    let assembly: &[u8] = bytemuck::cast_slice(&compiled.assembly);
    let key_bytes = key.to_bytes()?;
    let layout = uniforms.layout;
    let shader = screen.cache.insert(key.cache_id(), &key_bytes, assembly, |kernel| CompiledShader {
        stage,
        key: key.clone(),
        kernel,
        prog_data,
        streamout,
        system_values: layout.system_values,
        kernel_input_size,
        num_cbufs: layout.num_cbufs,
        bt: bt.table,
    })?;

    log::debug!(
        "Compiled {} shader of program {}: {} bytes at {:#x}, {} system values, {} cbufs",
        stage.name(),
        key.base().program_string_id,
        shader.kernel.size,
        shader.kernel.offset,
        shader.system_values.len(),
        shader.num_cbufs
    );

    if let (Some(ish), Some(disk)) = (ish, screen.disk()) {
        let entry = DiskEntry {
            assembly: assembly.to_vec(),
            prog_data: shader.prog_data.clone(),
            streamout: shader.streamout.clone(),
            system_values: shader.system_values.clone(),
            kernel_input_size: shader.kernel_input_size,
            num_cbufs: shader.num_cbufs,
            bt: shader.bt.clone(),
        };
        match serde_json::to_vec(&entry) {
            Ok(blob) => disk.store(&screen.disk_key_for(&ish.source_hash, key)?, &blob),
            Err(e) => log::warn!("Could not serialize program {} for the disk cache: {}", ish.program_id, e),
        }
    }

    Ok(shader)
}
