use brw_ir::{
    patch::{
        make_swizzle, ClampPointSize, DefaultEdgeFlag, FixEdgeFlags, FoldConstants, LowerClipPlanes,
        LowerFsOutputs, LowerTexSwizzle, SWIZZLE_NOOP,
    },
    slots::*,
    verify::validate,
    AluOp, Builder, Instr, Intrinsic, IrError, Shader, Src, Ssa, Stage, TexOp,
};

fn vs_with_position() -> Shader {
    let mut shader = Shader::new(Stage::Vertex);
    let mut b = Builder::new(&mut shader);
    let pos = b.load_input(0, 4);
    b.store_output(VARYING_SLOT_POS, 0, pos);
    shader
}

#[test]
fn fold_and_remove() {
    let mut shader = Shader::new(Stage::Vertex);
    let mut b = Builder::new(&mut shader);
    let a = b.imm(2);
    let c = b.imm(3);
    let sum = b.iadd(a, c);
    b.store_output(VARYING_SLOT_VAR0, 0, sum);

    let mut fold = FoldConstants::new();
    let shader = shader.patch().patch_ref(&mut fold).unwrap().unwrap_shader();

    assert_eq!(fold.folded, 1, "iadd should fold");
    assert_eq!(fold.removed, 3, "all load_consts are dead after propagation");
    assert_eq!(shader.instrs.len(), 1);
    assert_eq!(shader.instrs[0].srcs(), &[Src::Const(5)]);
}

#[test]
fn clip_planes_write_distances() {
    let mut lower = LowerClipPlanes::new(0b101);
    let shader = vs_with_position()
        .patch()
        .patch_ref(&mut lower)
        .unwrap()
        .unwrap_shader();

    assert!(lower.lowered);
    validate(&shader, "after clip planes").unwrap();
    assert_eq!(
        shader.count_intrinsics(|i| matches!(i, Intrinsic::LoadUserClipPlane { .. })),
        2,
        "one plane load per enabled plane"
    );
    assert_eq!(shader.info.clip_distance_array_size, 3);
    assert!(shader.info.outputs_written & bit(VARYING_SLOT_CLIP_DIST0) != 0);

    let components: Vec<u8> = shader
        .intrinsics()
        .filter_map(|(op, _)| match op {
            Intrinsic::StoreOutput {
                location: VARYING_SLOT_CLIP_DIST0,
                component,
            } => Some(*component),
            _ => None,
        })
        .collect();
    assert_eq!(components, vec![0, 2]);
}

#[test]
fn clip_planes_reject_fragment() {
    let shader = Shader::new(Stage::Fragment);
    let res = shader.patch().patch(LowerClipPlanes::new(1));
    assert!(matches!(res, Err(IrError::WrongStage { .. })));
}

#[test]
fn clamp_point_size() {
    let mut shader = vs_with_position();
    let mut b = Builder::new(&mut shader);
    let size = b.load_input(1, 1);
    b.store_output(VARYING_SLOT_PSIZ, 0, size);

    let shader = shader
        .patch()
        .patch(ClampPointSize::hw_limits())
        .unwrap()
        .unwrap_shader();
    validate(&shader, "after point size").unwrap();

    let n = shader.instrs.len();
    assert!(matches!(
        shader.instrs[n - 3],
        Instr::Alu {
            op: AluOp::Fmax,
            ..
        }
    ));
    let clamped = match &shader.instrs[n - 2] {
        Instr::Alu {
            op: AluOp::Fmin,
            dest,
            srcs,
            ..
        } => {
            assert_eq!(srcs[1], Src::float(255.0));
            *dest
        }
        other => panic!("expected fmin, got {:?}", other),
    };
    assert_eq!(shader.instrs[n - 1].srcs(), &[Src::Ssa(clamped)]);
}

#[test]
fn edge_flags() {
    let mut shader = vs_with_position();
    let mut b = Builder::new(&mut shader);
    let edge = b.load_input(VERT_ATTRIB_EDGEFLAG, 1);
    b.store_output(VARYING_SLOT_EDGE, 0, edge);

    let mut fix = FixEdgeFlags::default();
    let shader = shader.patch().patch_ref(&mut fix).unwrap().unwrap_shader();
    assert_eq!(fix.fixed, 1);
    assert_eq!(shader.info.outputs_written & bit(VARYING_SLOT_EDGE), 0);

    let shader = shader.patch().patch(DefaultEdgeFlag).unwrap().unwrap_shader();
    assert!(shader.info.outputs_written & bit(VARYING_SLOT_EDGE) != 0);
    assert_eq!(
        shader.instrs.last().unwrap().srcs(),
        &[Src::float(1.0)],
        "default edge flag is 1.0"
    );
}

#[test]
fn tex_swizzle_is_applied() {
    let mut shader = Shader::new(Stage::Fragment);
    let mut b = Builder::new(&mut shader);
    let coord = b.load_input(VARYING_SLOT_VAR0, 2);
    let texel = b.tex(TexOp::Tex, 1, 0, coord);
    b.store_output(FRAG_RESULT_DATA0, 0, texel);

    let mut swizzles = [SWIZZLE_NOOP; 32];
    swizzles[1] = make_swizzle([2, 1, 0, 5]);
    let shader = shader
        .patch()
        .patch(LowerTexSwizzle::new(swizzles))
        .unwrap()
        .unwrap_shader();
    validate(&shader, "after swizzle").unwrap();

    let swizzled = match &shader.instrs[2] {
        Instr::Alu {
            op: AluOp::Swizzle(channels),
            dest,
            srcs,
            ..
        } => {
            assert_eq!(*channels, [2, 1, 0, 5]);
            assert_eq!(srcs[0], Src::Ssa(texel));
            *dest
        }
        other => panic!("expected swizzle, got {:?}", other),
    };
    assert_eq!(shader.instrs[3].srcs(), &[Src::Ssa(swizzled)]);
}

#[test]
fn builder_ignores_indices_past_the_usage_masks() {
    let mut shader = Shader::new(Stage::Fragment);
    let mut b = Builder::new(&mut shader);
    let coord = b.load_input(VARYING_SLOT_VAR0, 2);
    b.tex(TexOp::Tex, 1, 2, coord);
    let far = b.tex(TexOp::Txf, 70, 40, coord);
    b.store_output(FRAG_RESULT_DATA0, 0, far);

    assert_eq!(shader.info.textures_used, 0b10);
    assert_eq!(shader.info.textures_used_by_txf, 0);
    assert_eq!(shader.info.samplers_used, 0b100);
    assert!(matches!(
        shader.instrs[2],
        Instr::Tex {
            texture_index: 70,
            ..
        }
    ));
}

#[test]
fn gather_swizzle_selects_channel() {
    let mut shader = Shader::new(Stage::Fragment);
    let mut b = Builder::new(&mut shader);
    let coord = b.load_input(VARYING_SLOT_VAR0, 2);
    let texel = b.tex(TexOp::Tg4, 0, 0, coord);
    b.store_output(FRAG_RESULT_DATA0, 0, texel);

    let mut swizzles = [SWIZZLE_NOOP; 32];
    swizzles[0] = make_swizzle([3, 0, 0, 0]);
    let shader = shader
        .patch()
        .patch(LowerTexSwizzle::new(swizzles))
        .unwrap()
        .unwrap_shader();

    assert_eq!(shader.instrs.len(), 3, "gather is not followed by a swizzle");
    assert!(matches!(shader.instrs[1], Instr::Tex { component: 3, .. }));
}

#[test]
fn framebuffer_fetch_reads_render_target() {
    let mut shader = Shader::new(Stage::Fragment);
    let mut b = Builder::new(&mut shader);
    let color = b.load(
        Intrinsic::LoadFragOutput {
            location: FRAG_RESULT_DATA0 + 2,
        },
        &[],
        4,
    );
    b.store_output(FRAG_RESULT_DATA0 + 2, 0, color);

    let mut lower = LowerFsOutputs::default();
    let shader = shader.patch().patch_ref(&mut lower).unwrap().unwrap_shader();
    validate(&shader, "after fs outputs").unwrap();

    assert_eq!(lower.lowered, 1);
    assert_eq!(
        shader.instrs[0].intrinsic(),
        Some(Intrinsic::LoadOutput {
            location: FRAG_RESULT_DATA0 + 2
        })
    );
    assert_eq!(shader.instrs[0].srcs(), &[Src::Const(2)]);
    assert!(shader.info.outputs_read & bit(FRAG_RESULT_DATA0 + 2) != 0);
}

#[test]
fn validation_catches_use_before_def() {
    let mut shader = Shader::new(Stage::Compute);
    let dest = shader.alloc_ssa();
    shader.instrs.push(Instr::Alu {
        dest,
        op: AluOp::Mov,
        srcs: [Src::Ssa(Ssa(7))].into_iter().collect(),
        components: 1,
    });

    match validate(&shader, "before remapping") {
        Err(IrError::Validation { when, .. }) => assert_eq!(when, "before remapping"),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn source_hash_tracks_content() {
    let a = vs_with_position();
    let mut b = vs_with_position();
    assert_eq!(a.source_hash().unwrap(), b.source_hash().unwrap());

    Builder::new(&mut b).store_output(VARYING_SLOT_PSIZ, 0, Src::float(1.0));
    assert_ne!(a.source_hash().unwrap(), b.source_hash().unwrap());
}
