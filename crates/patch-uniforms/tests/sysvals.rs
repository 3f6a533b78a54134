use brw_ir::{slots::*, AluOp, Builder, Instr, Intrinsic, Shader, Src, Stage};
use patch_uniforms::*;

fn remap(shader: Shader, kernel_input_size: u32) -> (Shader, UniformLayout) {
    let mut setup = SetupUniforms::new(kernel_input_size);
    let shader = shader.patch().patch_ref(&mut setup).unwrap().unwrap_shader();
    (shader, setup.layout)
}

fn ubo_loads(shader: &Shader) -> Vec<(Src, Src)> {
    shader
        .intrinsics()
        .filter(|(op, _)| **op == Intrinsic::LoadUbo)
        .map(|(_, srcs)| (srcs[0], srcs[1]))
        .collect()
}

fn clip_plane_vs() -> Shader {
    let mut shader = Shader::new(Stage::Vertex);
    shader.info.num_ubos = 1;
    shader.num_uniforms = 16;
    let mut b = Builder::new(&mut shader);
    for (i, ucp) in [0, 0, 2].into_iter().enumerate() {
        let plane = b.load(Intrinsic::LoadUserClipPlane { ucp }, &[], 4);
        b.store_output(VARYING_SLOT_VAR0 + i as u32, 0, plane);
    }
    shader
}

#[test]
fn clip_planes_move_to_sysval_buffer() {
    let (shader, layout) = remap(clip_plane_vs(), 0);

    assert_eq!(layout.system_values.len(), 8, "two distinct planes");
    assert_eq!(layout.system_values[5], SystemValue::ClipPlane { ucp: 2, comp: 1 });
    assert_eq!(layout.sysval_cbuf, Some(2), "cbuf0 for uniforms, then one user ubo");
    assert_eq!(layout.num_cbufs, 3);
    assert_eq!(layout.constant_data_cbuf, None);
    assert_eq!(shader.num_uniforms, 0);

    assert_eq!(
        ubo_loads(&shader),
        vec![
            (Src::Const(2), Src::Const(0)),
            (Src::Const(2), Src::Const(0)),
            (Src::Const(2), Src::Const(16)),
        ]
    );
    assert!(
        !shader.instrs.iter().any(|i| matches!(i, Instr::Undef { .. })),
        "placeholder must be gone"
    );
}

#[test]
fn remap_twice_is_noop() {
    let (once, _) = remap(clip_plane_vs(), 0);
    let (twice, layout) = remap(once.clone(), 0);

    assert_eq!(once.instrs, twice.instrs);
    assert!(layout.system_values.is_empty());
    assert_eq!(layout.sysval_cbuf, None);
}

#[test]
fn image_params() {
    let mut shader = Shader::new(Stage::Fragment);
    shader.info.num_images = 3;
    let mut b = Builder::new(&mut shader);
    let size = b.load(
        Intrinsic::ImageLoadParam {
            binding: 1,
            array_len: 2,
            param: 1,
        },
        &[Src::Const(1)],
        4,
    );
    b.store_output(FRAG_RESULT_DATA0, 0, size);

    let (shader, layout) = remap(shader, 0);
    assert_eq!(
        layout.system_values.len(),
        2 * BRW_IMAGE_PARAM_SIZE as usize,
        "whole array gets params"
    );
    assert_eq!(
        layout.system_values[BRW_IMAGE_PARAM_SIZE as usize + 4],
        SystemValue::ImageParam { image: 2, dword: 2 }
    );
    //Element 1 of the array, vec4 1 (size) of its block.
    assert_eq!(
        ubo_loads(&shader),
        vec![(Src::Const(0), Src::Const(80 + 16))]
    );
}

#[test]
fn image_array_index_is_clamped() {
    let mut shader = Shader::new(Stage::Fragment);
    let mut b = Builder::new(&mut shader);
    let idx = b.load_input(VARYING_SLOT_VAR0, 1);
    let param = b.load(
        Intrinsic::ImageLoadParam {
            binding: 0,
            array_len: 4,
            param: 0,
        },
        &[Src::Ssa(idx)],
        4,
    );
    b.store_output(FRAG_RESULT_DATA0, 0, param);

    let (shader, _) = remap(shader, 0);
    let clamp = shader.instrs.iter().find_map(|i| match i {
        Instr::Alu {
            op: AluOp::Umin,
            srcs,
            ..
        } => Some(srcs[1]),
        _ => None,
    });
    assert_eq!(clamp, Some(Src::Const(3 * 80)));
}

#[test]
fn kernel_input_precedes_sysvals() {
    let mut shader = Shader::new(Stage::Compute);
    let mut b = Builder::new(&mut shader);
    let dim = b.load(Intrinsic::LoadWorkDim, &[], 1);
    let input = b.load(Intrinsic::LoadKernelInput { base: 4, range: 2 }, &[Src::Const(0)], 1);
    b.store_ssbo(dim, 0u32, 0u32);
    b.store_ssbo(input, 0u32, 4u32);

    let (shader, layout) = remap(shader, 6);
    assert_eq!(layout.system_values, vec![SystemValue::WorkDim]);
    assert_eq!(layout.sysval_cbuf, Some(0));
    assert_eq!(
        ubo_loads(&shader),
        vec![(Src::Const(0), Src::Const(8)), (Src::Const(0), Src::Const(4))]
    );
}

#[test]
fn kernel_input_out_of_range() {
    let mut shader = Shader::new(Stage::Compute);
    let mut b = Builder::new(&mut shader);
    let input = b.load(Intrinsic::LoadKernelInput { base: 4, range: 8 }, &[Src::Const(0)], 1);
    b.store_ssbo(input, 0u32, 0u32);

    let res = shader.patch().patch(SetupUniforms::new(8));
    assert!(matches!(res, Err(RemapError::KernelInputOutOfRange { .. })));
}

#[test]
fn constant_data_goes_last() {
    let mut shader = Shader::new(Stage::Vertex);
    shader.constant_data = vec![0; 64];
    let mut b = Builder::new(&mut shader);
    let plane = b.load(Intrinsic::LoadUserClipPlane { ucp: 0 }, &[], 4);
    let idx = b.load_input(0, 1);
    let data = b.load(Intrinsic::LoadConstant { base: 8 }, &[Src::Ssa(idx)], 4);
    b.store_output(VARYING_SLOT_VAR0, 0, plane);
    b.store_output(VARYING_SLOT_VAR0 + 1, 0, data);

    let (shader, layout) = remap(shader, 0);
    assert_eq!(layout.sysval_cbuf, Some(0));
    assert_eq!(layout.num_cbufs, 1);
    assert_eq!(layout.constant_data_cbuf, Some(1));

    let loads = ubo_loads(&shader);
    assert_eq!(loads[1].0, Src::Const(1));
    let clamp = shader.instrs.iter().find_map(|i| match i {
        Instr::Alu {
            op: AluOp::Umin,
            srcs,
            ..
        } => Some(srcs[1]),
        _ => None,
    });
    assert_eq!(clamp, Some(Src::Const(64 - 16)));
}

#[test]
fn base_workgroup_id_is_zero() {
    let mut shader = Shader::new(Stage::Compute);
    let mut b = Builder::new(&mut shader);
    let id = b.load(Intrinsic::LoadBaseWorkgroupId, &[], 3);
    b.store_ssbo(id, 0u32, 0u32);

    let (shader, layout) = remap(shader, 0);
    assert_eq!(
        shader.count_intrinsics(|op| *op == Intrinsic::LoadBaseWorkgroupId),
        0
    );
    assert!(layout.system_values.is_empty());
    let stored = shader.instrs.last().unwrap().srcs()[0].as_ssa().unwrap();
    assert!(matches!(
        shader.def(stored),
        Some(Instr::LoadConst { values, .. }) if values.as_slice() == &[0, 0, 0][..]
    ));
}

#[test]
fn fixed_workgroup_size_is_rejected() {
    let mut shader = Shader::new(Stage::Compute);
    let mut b = Builder::new(&mut shader);
    let size = b.load(Intrinsic::LoadWorkgroupSize, &[], 3);
    b.store_ssbo(size, 0u32, 0u32);

    let res = shader.patch().patch(SetupUniforms::new(0));
    assert!(matches!(res, Err(RemapError::FixedWorkgroupSize)));
}

#[test]
fn too_many_constant_buffers() {
    let mut shader = Shader::new(Stage::Fragment);
    shader.info.num_ubos = 15;
    let res = shader.patch().patch(SetupUniforms::new(0));
    assert!(matches!(res, Err(RemapError::TooManyConstantBuffers(16))));
}
