use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use brw_ir::{slots::*, Builder, Intrinsic, OutputPrimitive, Shader, Stage, TessPrimitive};
use patch_uniforms::SystemValue;
use shader_driver::{
    backend::{StageProgData, TessOutputTopology, VueProgData},
    shader::StreamOutput,
    state::{DirtyFlags, FramebufferState, RasterizerState, StageDirtyFlags, VueMap},
    Backend, CompileParams, CompiledCode, Context, DeviceInfo, DriverConfig, ProgData, Screen, ShaderKey,
    StreamOutputInfo,
};
use smallvec::smallvec;
use variant_cache::{DiskCache, MemoryDiskCache};

///Backend that "compiles" a shader into its source hash followed by the instruction count.
#[derive(Default)]
struct MockBackend {
    calls: [AtomicUsize; 6],
    fail: Option<Stage>,
    delay: Option<Duration>,
}

impl MockBackend {
    fn failing(stage: Stage) -> Self {
        MockBackend {
            fail: Some(stage),
            ..Default::default()
        }
    }

    fn calls(&self, stage: Stage) -> usize {
        self.calls[stage.index()].load(Ordering::SeqCst)
    }

    fn compile(&self, stage: Stage, params: &CompileParams) -> Result<CompiledCode, String> {
        self.calls[stage.index()].fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail == Some(stage) {
            return Err(format!("{} rejected by the mock backend", stage.abbrev()));
        }

        let mut assembly: Vec<u32> = params
            .source_hash
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assembly.push(params.shader.instrs.len() as u32);

        let vue = VueProgData {
            urb_entry_size: 2,
            vue_map: VueMap::default(),
        };
        let stage_data = match stage {
            Stage::Vertex => StageProgData::Vs {
                vue,
                uses_draw_params: false,
                uses_derived_draw_params: false,
                needs_sgvs_element: false,
            },
            Stage::TessCtrl => StageProgData::Tcs { vue },
            Stage::TessEval => StageProgData::Tes {
                vue,
                output_topology: TessOutputTopology::TriCw,
            },
            Stage::Geometry => StageProgData::Gs {
                vue,
                output_topology: params.shader.info.gs.output_primitive,
            },
            Stage::Fragment => StageProgData::Fs {
                uses_kill: false,
                computed_depth: false,
            },
            Stage::Compute => StageProgData::Cs {
                simd_size: 16,
                uses_num_work_groups: false,
            },
        };

        Ok(CompiledCode {
            assembly,
            prog_data: ProgData::new(stage_data),
        })
    }
}

impl Backend for MockBackend {
    fn compile_vs(&self, params: &CompileParams) -> Result<CompiledCode, String> {
        self.compile(Stage::Vertex, params)
    }
    fn compile_tcs(&self, params: &CompileParams) -> Result<CompiledCode, String> {
        self.compile(Stage::TessCtrl, params)
    }
    fn compile_tes(&self, params: &CompileParams) -> Result<CompiledCode, String> {
        self.compile(Stage::TessEval, params)
    }
    fn compile_gs(&self, params: &CompileParams) -> Result<CompiledCode, String> {
        self.compile(Stage::Geometry, params)
    }
    fn compile_fs(&self, params: &CompileParams) -> Result<CompiledCode, String> {
        self.compile(Stage::Fragment, params)
    }
    fn compile_cs(&self, params: &CompileParams) -> Result<CompiledCode, String> {
        self.compile(Stage::Compute, params)
    }
}

fn init_log() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init();
}

fn no_precompile() -> DriverConfig {
    DriverConfig {
        precompile: false,
        compiler_threads: 0,
        ..Default::default()
    }
}

fn screen(backend: &Arc<MockBackend>) -> Arc<Screen> {
    init_log();
    Screen::new(no_precompile(), DeviceInfo::new(9), backend.clone(), None)
}

///VS writing the position and the generic varyings `vars`.
fn vs(vars: &[u32]) -> Shader {
    let mut shader = Shader::new(Stage::Vertex);
    let mut b = Builder::new(&mut shader);
    let pos = b.load_input(0, 4);
    b.store_output(VARYING_SLOT_POS, 0, pos);
    for var in vars {
        b.store_output(VARYING_SLOT_VAR0 + var, 0, pos);
    }
    shader
}

///FS reading `vars` and writing the first colour output.
fn fs(vars: &[u32]) -> Shader {
    let mut shader = Shader::new(Stage::Fragment);
    let mut b = Builder::new(&mut shader);
    let mut last = b.imm_f32(0.0);
    for var in vars {
        last = b.load_input(VARYING_SLOT_VAR0 + var, 4);
    }
    b.store_output(FRAG_RESULT_DATA0, 0, last);
    shader
}

fn tes() -> Shader {
    let mut shader = Shader::new(Stage::TessEval);
    shader.info.tess.primitive_mode = TessPrimitive::Triangles;
    let mut b = Builder::new(&mut shader);
    let v = b.load_input(VARYING_SLOT_VAR0, 4);
    b.store_output(VARYING_SLOT_POS, 0, v);
    shader
}

fn gs(output_primitive: OutputPrimitive) -> Shader {
    let mut shader = Shader::new(Stage::Geometry);
    shader.info.gs.output_primitive = output_primitive;
    let mut b = Builder::new(&mut shader);
    let v = b.load_input(VARYING_SLOT_POS, 4);
    b.store_output(VARYING_SLOT_POS, 0, v);
    shader
}

fn bound_context(screen: &Arc<Screen>, vs_vars: &[u32], fs_vars: &[u32]) -> Context {
    let mut ctx = Context::new(screen.clone());
    ctx.bind_vs_state(Some(screen.create_shader(vs(vs_vars), None).unwrap()));
    ctx.bind_fs_state(Some(screen.create_shader(fs(fs_vars), None).unwrap()));
    ctx
}

#[test]
fn draws_reuse_bound_variants() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);

    assert!(ctx.update_compiled_shaders().unwrap());
    let vs = ctx.prog(Stage::Vertex).unwrap().clone();
    let fs = ctx.prog(Stage::Fragment).unwrap().clone();
    assert!(ctx.prog(Stage::TessCtrl).is_none());
    assert!(ctx.prog(Stage::Geometry).is_none());
    ctx.take_dirty();

    //Rebinding the same shaders finds the existing variants.
    let vs_ish = ctx.uncompiled(Stage::Vertex).cloned();
    ctx.bind_vs_state(vs_ish);
    assert!(ctx.update_compiled_shaders().unwrap());
    assert!(ctx.update_compiled_shaders().unwrap());

    assert_eq!(backend.calls(Stage::Vertex), 1);
    assert_eq!(backend.calls(Stage::Fragment), 1);
    assert!(Arc::ptr_eq(ctx.prog(Stage::Vertex).unwrap(), &vs));
    assert!(Arc::ptr_eq(ctx.prog(Stage::Fragment).unwrap(), &fs));

    let (_, stage_dirty) = ctx.take_dirty();
    assert!(
        !stage_dirty.contains(StageDirtyFlags::VS),
        "same variant must not flag the stage"
    );
}

#[test]
fn clip_planes_select_new_variant() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);

    assert!(ctx.update_compiled_shaders().unwrap());
    let plain = ctx.prog(Stage::Vertex).unwrap().clone();
    assert!(plain.system_values.is_empty());
    ctx.take_dirty();

    ctx.set_rasterizer_state(RasterizerState {
        clip_plane_enable: 0b101,
        ..Default::default()
    });
    assert!(ctx.update_compiled_shaders().unwrap());

    let clipped = ctx.prog(Stage::Vertex).unwrap().clone();
    assert!(!Arc::ptr_eq(&plain, &clipped));
    match &clipped.key {
        ShaderKey::Vs(key) => assert_eq!(key.nr_userclip_plane_consts, 3, "planes up to the highest enabled one"),
        other => panic!("unexpected key {:?}", other),
    }
    assert!(clipped
        .system_values
        .contains(&SystemValue::ClipPlane { ucp: 2, comp: 3 }));
    assert_eq!(backend.calls(Stage::Vertex), 2);
    assert_eq!(backend.calls(Stage::Fragment), 1, "fragment key did not change");

    let (_, stage_dirty) = ctx.take_dirty();
    assert!(stage_dirty.contains(StageDirtyFlags::VS | StageDirtyFlags::CONSTANTS_VS));

    //Going back selects the first variant again.
    ctx.set_rasterizer_state(RasterizerState::default());
    assert!(ctx.update_compiled_shaders().unwrap());
    assert!(Arc::ptr_eq(ctx.prog(Stage::Vertex).unwrap(), &plain));
    assert_eq!(backend.calls(Stage::Vertex), 2);
}

#[test]
fn failed_variant_is_not_retried() {
    let backend = Arc::new(MockBackend::failing(Stage::Fragment));
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);

    assert!(!ctx.update_compiled_shaders().unwrap(), "draw is skipped");
    assert!(ctx.prog(Stage::Fragment).is_none());
    assert!(ctx.prog(Stage::Vertex).is_some());

    let fs_ish = ctx.uncompiled(Stage::Fragment).cloned();
    ctx.bind_fs_state(fs_ish);
    assert!(!ctx.update_compiled_shaders().unwrap());
    assert_eq!(backend.calls(Stage::Fragment), 1);
}

#[test]
fn concurrent_lookups_compile_once() {
    init_log();
    let backend = Arc::new(MockBackend {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let screen = Screen::new(no_precompile(), DeviceInfo::new(9), backend.clone(), None);
    let ish = screen.create_shader(vs(&[0]), None).unwrap();
    let key = screen.default_key(&ish);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| screen.find_or_compile_variant(&ish, &key, None).unwrap().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(backend.calls(Stage::Vertex), 1);
    assert_eq!(ish.variants.len(), 1);
    for shader in &results[1..] {
        assert!(Arc::ptr_eq(shader, &results[0]), "every thread sees the same variant");
    }
}

#[test]
fn concurrent_contexts_share_passthrough_tcs() {
    init_log();
    let backend = Arc::new(MockBackend {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let screen = Screen::new(no_precompile(), DeviceInfo::new(9), backend.clone(), None);
    let vs_ish = screen.create_shader(vs(&[0]), None).unwrap();
    let fs_ish = screen.create_shader(fs(&[0]), None).unwrap();
    let tes_ish = screen.create_shader(tes(), None).unwrap();

    let contexts: Vec<_> = (0..4)
        .map(|_| {
            let mut ctx = Context::new(screen.clone());
            ctx.bind_vs_state(Some(vs_ish.clone()));
            ctx.bind_fs_state(Some(fs_ish.clone()));
            ctx.bind_tes_state(Some(tes_ish.clone()));
            ctx
        })
        .collect();

    let tcs: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|mut ctx| {
                s.spawn(move || {
                    assert!(ctx.update_compiled_shaders().unwrap());
                    ctx.prog(Stage::TessCtrl).unwrap().clone()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(backend.calls(Stage::TessCtrl), 1);
    assert_eq!(backend.calls(Stage::Vertex), 1);
    assert_eq!(backend.calls(Stage::TessEval), 1);
    for shader in &tcs[1..] {
        assert!(Arc::ptr_eq(shader, &tcs[0]), "every context draws with the same passthrough TCS");
    }
}

#[test]
fn precompile_is_used_at_draw() {
    init_log();
    let backend = Arc::new(MockBackend::default());
    let config = DriverConfig {
        precompile: true,
        sync_compile: true,
        compiler_threads: 2,
        ..Default::default()
    };
    let screen = Screen::new(config, DeviceInfo::new(9), backend.clone(), None);

    let vs = screen.create_shader(vs(&[0]), None).unwrap();
    let fs = screen.create_shader(fs(&[0]), None).unwrap();
    assert!(screen.is_parallel_shader_compilation_finished(&vs));
    assert!(screen.is_parallel_shader_compilation_finished(&fs));
    assert_eq!(backend.calls(Stage::Vertex), 1);
    assert_eq!(backend.calls(Stage::Fragment), 1);

    let mut ctx = Context::new(screen.clone());
    ctx.set_framebuffer_state(FramebufferState { nr_cbufs: 1, samples: 1 });
    ctx.bind_vs_state(Some(vs));
    ctx.bind_fs_state(Some(fs));
    assert!(ctx.update_compiled_shaders().unwrap());

    assert_eq!(backend.calls(Stage::Vertex), 1, "draw used the precompiled variant");
    assert_eq!(backend.calls(Stage::Fragment), 1, "draw used the precompiled variant");
}

#[test]
fn disk_cache_skips_backend_on_new_screen() {
    init_log();
    let disk = Arc::new(MemoryDiskCache::new());

    let first_backend = Arc::new(MockBackend::default());
    let first = Screen::new(
        no_precompile(),
        DeviceInfo::new(9),
        first_backend.clone(),
        Some(disk.clone() as Arc<dyn DiskCache>),
    );
    let mut ctx = bound_context(&first, &[0], &[0]);
    assert!(ctx.update_compiled_shaders().unwrap());
    let kernel = first.cache.kernel_bytes(ctx.prog(Stage::Vertex).unwrap().kernel).unwrap();
    assert_eq!(disk.len(), 2, "one entry per stage");

    let second_backend = Arc::new(MockBackend::default());
    let second = Screen::new(
        no_precompile(),
        DeviceInfo::new(9),
        second_backend.clone(),
        Some(disk.clone() as Arc<dyn DiskCache>),
    );
    //The id sequence differs from the first screen, the disk key doesn't include it.
    second.next_program_id();
    let mut ctx = bound_context(&second, &[0], &[0]);
    assert!(ctx.update_compiled_shaders().unwrap());

    assert_eq!(second_backend.calls(Stage::Vertex), 0);
    assert_eq!(second_backend.calls(Stage::Fragment), 0);
    let loaded = ctx.prog(Stage::Vertex).unwrap();
    assert_eq!(second.cache.kernel_bytes(loaded.kernel).unwrap(), kernel);
}

#[test]
fn disk_cache_is_keyed_by_device_and_layout() {
    init_log();
    let disk = Arc::new(MemoryDiskCache::new());
    let draw_on = |config: DriverConfig, devinfo: DeviceInfo| {
        let backend = Arc::new(MockBackend::default());
        let screen = Screen::new(config, devinfo, backend.clone(), Some(disk.clone() as Arc<dyn DiskCache>));
        let mut ctx = bound_context(&screen, &[0], &[0]);
        assert!(ctx.update_compiled_shaders().unwrap());
        backend.calls(Stage::Vertex)
    };

    assert_eq!(draw_on(no_precompile(), DeviceInfo::new(9)), 1);
    assert_eq!(draw_on(no_precompile(), DeviceInfo::new(9)), 0, "same device loads from disk");
    assert_eq!(draw_on(no_precompile(), DeviceInfo::new(11)), 1, "other generation misses");

    let uncompacted = DriverConfig {
        disable_compact_binding_table: true,
        ..no_precompile()
    };
    assert_eq!(draw_on(uncompacted, DeviceInfo::new(9)), 1, "other table layout misses");
    assert_eq!(disk.len(), 6);
}

#[test]
fn identical_programs_share_kernel() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);

    let a = screen.create_shader(vs(&[0, 1]), None).unwrap();
    let b = screen.create_shader(vs(&[0, 1]), None).unwrap();
    assert_ne!(a.program_id, b.program_id);

    let va = screen.find_or_compile_variant(&a, &screen.default_key(&a), None).unwrap().unwrap();
    let vb = screen.find_or_compile_variant(&b, &screen.default_key(&b), None).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&va, &vb), "keys differ by program id");
    assert_eq!(va.kernel, vb.kernel, "identical code is uploaded once");
    assert_eq!(backend.calls(Stage::Vertex), 2);
}

#[test]
fn passthrough_tcs_follows_patch_size() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);
    ctx.bind_tes_state(Some(screen.create_shader(tes(), None).unwrap()));

    assert!(ctx.update_compiled_shaders().unwrap());
    let tcs = ctx.prog(Stage::TessCtrl).unwrap().clone();
    assert_eq!(tcs.key.base().program_string_id, 0);
    assert!(ctx.prog(Stage::TessEval).is_some());
    assert_eq!(ctx.last_vue_stage(), Stage::TessEval);
    assert_eq!(backend.calls(Stage::TessCtrl), 1);

    ctx.set_patch_vertices(4);
    assert!(ctx.update_compiled_shaders().unwrap());
    match &ctx.prog(Stage::TessCtrl).unwrap().key {
        ShaderKey::Tcs(key) => assert_eq!(key.input_vertices, 4),
        other => panic!("unexpected key {:?}", other),
    }
    assert_eq!(backend.calls(Stage::TessCtrl), 2);

    //The first passthrough variant is still known to the screen.
    ctx.set_patch_vertices(0);
    assert!(ctx.update_compiled_shaders().unwrap());
    assert!(Arc::ptr_eq(ctx.prog(Stage::TessCtrl).unwrap(), &tcs));
    assert_eq!(backend.calls(Stage::TessCtrl), 2);

    ctx.bind_tes_state(None);
    assert!(ctx.update_compiled_shaders().unwrap());
    assert!(ctx.prog(Stage::TessCtrl).is_none());
    assert!(ctx.prog(Stage::TessEval).is_none());
}

#[test]
fn failed_passthrough_tcs_is_not_retried() {
    let backend = Arc::new(MockBackend::failing(Stage::TessCtrl));
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);
    let tes_ish = screen.create_shader(tes(), None).unwrap();
    ctx.bind_tes_state(Some(tes_ish.clone()));

    assert!(!ctx.update_compiled_shaders().unwrap(), "draw is skipped");
    assert!(ctx.prog(Stage::TessCtrl).is_none());

    ctx.bind_tes_state(None);
    assert!(ctx.update_compiled_shaders().unwrap());
    ctx.bind_tes_state(Some(tes_ish));
    assert!(!ctx.update_compiled_shaders().unwrap());
    assert_eq!(backend.calls(Stage::TessCtrl), 1);

    //Another context runs into the same failed variant.
    let mut other = bound_context(&screen, &[0], &[0]);
    other.bind_tes_state(ctx.uncompiled(Stage::TessEval).cloned());
    assert!(!other.update_compiled_shaders().unwrap());
    assert_eq!(backend.calls(Stage::TessCtrl), 1);
}

#[test]
fn viewport_output_flags_viewport_state() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);
    assert!(ctx.update_compiled_shaders().unwrap());
    assert_eq!(ctx.num_viewports(), 1);
    ctx.take_dirty();

    let mut nir = vs(&[0]);
    let mut b = Builder::new(&mut nir);
    let index = b.imm(1);
    b.store_output(VARYING_SLOT_VIEWPORT, 0, index);
    ctx.bind_vs_state(Some(screen.create_shader(nir, None).unwrap()));
    assert!(ctx.update_compiled_shaders().unwrap());

    assert_eq!(ctx.num_viewports(), 16);
    let (dirty, _) = ctx.take_dirty();
    assert!(dirty.contains(
        DirtyFlags::CLIP | DirtyFlags::SF_CL_VIEWPORT | DirtyFlags::CC_VIEWPORT | DirtyFlags::SCISSOR | DirtyFlags::SBE
    ));
    assert!(!dirty.contains(DirtyFlags::GEN4_CLIP_PROG), "gen9 has no clip program");
}

#[test]
fn streamout_decls_follow_vue_map() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);

    //Output #1 is the second written output, VAR0.
    let so = StreamOutputInfo {
        outputs: smallvec![StreamOutput {
            register_index: 1,
            num_components: 4,
            dst_offset: 4,
            ..Default::default()
        }],
        stride: [8, 0, 0, 0],
    };
    let mut ctx = Context::new(screen.clone());
    ctx.bind_vs_state(Some(screen.create_shader(vs(&[0]), Some(so)).unwrap()));
    ctx.bind_fs_state(Some(screen.create_shader(fs(&[0]), None).unwrap()));
    assert!(ctx.update_compiled_shaders().unwrap());

    let decls = ctx.streamout().unwrap();
    assert_eq!(decls.len(), 2, "a hole for the skipped dwords, then the output");
    assert!(decls[0].hole_flag);
    assert_eq!(decls[0].component_mask, 0xf);
    let slot = ctx.last_vue_map().unwrap().varying_to_slot(VARYING_SLOT_VAR0);
    assert_eq!(Some(decls[1].register_index), slot);
    assert_eq!(decls[1].component_mask, 0xf);

    let (dirty, _) = ctx.take_dirty();
    assert!(dirty.contains(DirtyFlags::SO_DECL_LIST | DirtyFlags::STREAMOUT));
}

#[test]
fn many_varyings_key_on_previous_stage() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let vars: Vec<u32> = (0..17).collect();
    let mut ctx = bound_context(&screen, &vars, &vars);

    assert!(ctx.update_compiled_shaders().unwrap());
    let slots_valid = ctx.last_vue_map().unwrap().slots_valid;
    match &ctx.prog(Stage::Fragment).unwrap().key {
        ShaderKey::Fs(key) => assert_eq!(key.input_slots_valid, slots_valid),
        other => panic!("unexpected key {:?}", other),
    }

    //A VS with a different output set changes the fragment layout.
    let more: Vec<u32> = (0..18).collect();
    ctx.bind_vs_state(Some(screen.create_shader(vs(&more), None).unwrap()));
    assert!(ctx.update_compiled_shaders().unwrap());
    assert_eq!(backend.calls(Stage::Fragment), 2);
}

#[test]
fn few_varyings_ignore_previous_stage() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);
    assert!(ctx.update_compiled_shaders().unwrap());

    ctx.bind_vs_state(Some(screen.create_shader(vs(&[0, 1, 2]), None).unwrap()));
    assert!(ctx.update_compiled_shaders().unwrap());
    assert_eq!(backend.calls(Stage::Fragment), 1);
}

#[test]
fn point_geometry_flags_clip_and_raster() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);
    assert!(ctx.update_compiled_shaders().unwrap());
    ctx.take_dirty();

    ctx.bind_gs_state(Some(screen.create_shader(gs(OutputPrimitive::Points), None).unwrap()));
    assert!(ctx.update_compiled_shaders().unwrap());
    assert_eq!(ctx.last_vue_stage(), Stage::Geometry);

    let (dirty, stage_dirty) = ctx.take_dirty();
    assert!(dirty.contains(DirtyFlags::CLIP | DirtyFlags::RASTER | DirtyFlags::URB));
    assert!(stage_dirty.contains(StageDirtyFlags::GS));
}

#[test]
fn deleting_bound_shader_skips_draw() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);
    let mut ctx = bound_context(&screen, &[0], &[0]);
    assert!(ctx.update_compiled_shaders().unwrap());

    let vs = ctx.uncompiled(Stage::Vertex).unwrap().clone();
    ctx.delete_shader_state(&vs);
    assert!(ctx.uncompiled(Stage::Vertex).is_none());
    assert!(!ctx.update_compiled_shaders().unwrap());
}

#[test]
fn compute_workgroup_size_is_folded() {
    let backend = Arc::new(MockBackend::default());
    let screen = screen(&backend);

    assert!(screen.create_compute_shader(vs(&[]), 0).is_err(), "not a compute shader");

    let mut nir = Shader::new(Stage::Compute);
    nir.info.workgroup_size = [8, 8, 1];
    nir.info.num_ssbos = 1;
    let mut b = Builder::new(&mut nir);
    let size = b.load(Intrinsic::LoadWorkgroupSize, &[], 3);
    let offset = b.imm(0);
    b.store_ssbo(size, 0u32, offset);
    let cs = screen.create_compute_shader(nir, 16).unwrap();

    let mut ctx = Context::new(screen.clone());
    ctx.bind_cs_state(Some(cs));
    assert!(ctx.update_compiled_compute_shader().unwrap());

    let prog = ctx.prog(Stage::Compute).unwrap();
    assert_eq!(prog.kernel_input_size, 16);
    assert!(
        !prog.system_values.iter().any(|sv| matches!(sv, SystemValue::WorkgroupSize(_))),
        "fixed sizes are constants"
    );
    assert_eq!(backend.calls(Stage::Compute), 1);
}
