//! Draw time variant selection.
//!
//! Binding shaders and changing state only sets dirty bits. [Context::update_compiled_shaders] then walks the dirty
//! stages in pipeline order, builds their keys, swaps in the matching variants and flags whatever state depends
//! on the swapped programs.

use std::sync::Arc;

use brw_ir::{
    patch::{make_swizzle, swizzle_channel, SWIZZLE_ONE},
    slots::{bit, fs_color_bits, VARYING_SLOT_COL0, VARYING_SLOT_COL1, VARYING_SLOT_PSIZ, VARYING_SLOT_VIEWPORT},
    Intrinsic, OutputPrimitive, Stage, TessPrimitive, TessSpacing,
};
use patch_binding_table::{WA_16BIT, WA_8BIT, WA_SIGN};
use variant_cache::CacheEvents;

use crate::{
    backend::{StageProgData, TessOutputTopology},
    keys::{BaseKey, CsKey, FsKey, GsKey, SamplerKey, ShaderKey, TcsKey, TesKey, VsKey, MAX_SAMPLERS},
    screen::Screen,
    shader::{CompiledShader, SoDecl, UncompiledShader},
    state::{
        BlendState, DepthStencilAlphaState, DirtyFlags, DrawState, FramebufferState, NosFlags, RasterizerState,
        SamplerView, StageDirtyFlags, TexFormat, UrbState, VueMap, MAX_VIEWPORTS,
    },
    DriverError,
};

const SWIZZLE_W: u16 = 3;

///Shader workaround needed to gather from `format` on Sandybridge.
fn gfx6_gather_workaround(format: TexFormat) -> u8 {
    match format {
        TexFormat::R8Sint => WA_SIGN | WA_8BIT,
        TexFormat::R8Uint => WA_8BIT,
        TexFormat::R16Sint => WA_SIGN | WA_16BIT,
        TexFormat::R16Uint => WA_16BIT,
        _ => 0,
    }
}

fn view_swizzle(view: &SamplerView) -> u16 {
    make_swizzle(view.swizzle.map(u16::from))
}

fn ptr_eq(a: &Option<Arc<CompiledShader>>, b: &Option<Arc<CompiledShader>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

///Index of the highest set bit plus one.
fn last_bit(mask: u32) -> u32 {
    32 - mask.leading_zeros()
}

///Per context shader state.
pub struct Context {
    screen: Arc<Screen>,
    ///API state keys are built from. Use the setters, they flag dependent shaders.
    draw: DrawState,
    pub dirty: DirtyFlags,
    pub stage_dirty: StageDirtyFlags,
    ///Stages to recompile when a piece of non-orthogonal state changes, indexed by [NosFlags] bit.
    stage_dirty_for_nos: [StageDirtyFlags; NosFlags::COUNT],
    uncompiled: [Option<Arc<UncompiledShader>>; 6],
    prog: [Option<Arc<CompiledShader>>; 6],
    last_vue_map: Option<VueMap>,
    streamout: Option<Vec<SoDecl>>,
    urb: UrbState,
    num_viewports: u32,
    output_topology_is_points_or_lines: bool,
    sysvals_need_upload: [bool; 6],
    window_space_position: bool,
    vs_needs_edge_flag: bool,
    vs_uses_draw_params: bool,
    vs_uses_derived_draw_params: bool,
    vs_needs_sgvs_element: bool,
}

impl Context {
    pub fn new(screen: Arc<Screen>) -> Self {
        Context {
            screen,
            draw: DrawState::default(),
            dirty: DirtyFlags::all(),
            stage_dirty: StageDirtyFlags::all(),
            stage_dirty_for_nos: [StageDirtyFlags::empty(); NosFlags::COUNT],
            uncompiled: Default::default(),
            prog: Default::default(),
            last_vue_map: None,
            streamout: None,
            urb: UrbState::default(),
            num_viewports: 1,
            output_topology_is_points_or_lines: false,
            sysvals_need_upload: [false; 6],
            window_space_position: false,
            vs_needs_edge_flag: false,
            vs_uses_draw_params: false,
            vs_uses_derived_draw_params: false,
            vs_needs_sgvs_element: false,
        }
    }

    pub fn screen(&self) -> &Arc<Screen> {
        &self.screen
    }

    pub fn draw_state(&self) -> &DrawState {
        &self.draw
    }

    ///Bound variant of `stage`.
    pub fn prog(&self, stage: Stage) -> Option<&Arc<CompiledShader>> {
        self.prog[stage.index()].as_ref()
    }

    pub fn uncompiled(&self, stage: Stage) -> Option<&Arc<UncompiledShader>> {
        self.uncompiled[stage.index()].as_ref()
    }

    ///VUE map of the last geometry stage.
    pub fn last_vue_map(&self) -> Option<&VueMap> {
        self.last_vue_map.as_ref()
    }

    pub fn streamout(&self) -> Option<&[SoDecl]> {
        self.streamout.as_deref()
    }

    pub fn num_viewports(&self) -> u32 {
        self.num_viewports
    }

    pub fn sysvals_need_upload(&self, stage: Stage) -> bool {
        self.sysvals_need_upload[stage.index()]
    }

    ///Hands the accumulated dirty bits to the state emission, which uploads everything they name.
    pub fn take_dirty(&mut self) -> (DirtyFlags, StageDirtyFlags) {
        self.sysvals_need_upload = [false; 6];
        (
            std::mem::take(&mut self.dirty),
            std::mem::take(&mut self.stage_dirty),
        )
    }

    ///Records the URB layout the state emission programmed.
    pub fn set_urb_config(&mut self, size: [u32; 4], constrained: bool) {
        self.urb = UrbState { size, constrained };
    }

    fn nos_changed(&mut self, nos: NosFlags) {
        for (i, dirty) in self.stage_dirty_for_nos.iter().enumerate() {
            if nos.bits() & (1 << i) != 0 {
                self.stage_dirty |= *dirty;
            }
        }
    }

    pub fn set_rasterizer_state(&mut self, rast: RasterizerState) {
        if self.draw.rasterizer == rast {
            return;
        }
        if self.draw.rasterizer.clip_plane_enable != rast.clip_plane_enable {
            self.dirty |= DirtyFlags::CLIP;
        }
        self.draw.rasterizer = rast;
        self.dirty |= DirtyFlags::RASTER | DirtyFlags::SBE;
        self.nos_changed(NosFlags::RASTERIZER);
    }

    pub fn set_framebuffer_state(&mut self, fb: FramebufferState) {
        if self.draw.framebuffer == fb {
            return;
        }
        self.draw.framebuffer = fb;
        self.dirty |= DirtyFlags::PS_BLEND | DirtyFlags::WM;
        self.nos_changed(NosFlags::FRAMEBUFFER);
    }

    pub fn set_blend_state(&mut self, blend: BlendState) {
        if self.draw.blend == blend {
            return;
        }
        self.draw.blend = blend;
        self.dirty |= DirtyFlags::PS_BLEND;
        self.nos_changed(NosFlags::BLEND);
    }

    pub fn set_depth_stencil_alpha_state(&mut self, dsa: DepthStencilAlphaState) {
        if self.draw.depth_stencil_alpha == dsa {
            return;
        }
        self.draw.depth_stencil_alpha = dsa;
        self.dirty |= DirtyFlags::WM;
        self.nos_changed(NosFlags::DEPTH_STENCIL_ALPHA);
    }

    pub fn set_sampler_views(&mut self, stage: Stage, views: Vec<Option<SamplerView>>) {
        self.draw.textures[stage.index()] = views;
        self.stage_dirty |= StageDirtyFlags::bindings(stage);
        self.nos_changed(NosFlags::TEXTURES);
    }

    pub fn set_vertex_elements_changed(&mut self) {
        self.dirty |= DirtyFlags::VERTEX_ELEMENTS;
        self.nos_changed(NosFlags::VERTEX_ELEMENTS);
    }

    pub fn set_patch_vertices(&mut self, vertices: u8) {
        if self.draw.vertices_per_patch == vertices {
            return;
        }
        self.draw.vertices_per_patch = vertices;
        //The passthrough TCS and multi patch TCS bake the patch size in.
        self.stage_dirty |= StageDirtyFlags::UNCOMPILED_TCS;
        //Read through gl_PatchVerticesIn.
        if let Some(tes) = &self.uncompiled[Stage::TessEval.index()] {
            if tes.nir.count_intrinsics(|op| *op == Intrinsic::LoadPatchVerticesIn) > 0 {
                self.stage_dirty |= StageDirtyFlags::CONSTANTS_TES;
                self.sysvals_need_upload[Stage::TessEval.index()] = true;
            }
        }
    }

    fn bind_shader_state(&mut self, ish: Option<Arc<UncompiledShader>>, stage: Stage) {
        let stage_dirty_bit = StageDirtyFlags::uncompiled(stage);
        let nos = ish.as_ref().map_or(NosFlags::empty(), |i| i.nos);

        let samplers = |s: &Option<Arc<UncompiledShader>>| s.as_ref().map_or(0, |s| last_bit(s.nir.info.samplers_used));
        if samplers(&self.uncompiled[stage.index()]) != samplers(&ish) {
            self.stage_dirty |= StageDirtyFlags::sampler_states(stage);
        }

        self.uncompiled[stage.index()] = ish;
        self.stage_dirty |= stage_dirty_bit;

        for (i, dirty) in self.stage_dirty_for_nos.iter_mut().enumerate() {
            if nos.bits() & (1 << i) != 0 {
                *dirty |= stage_dirty_bit;
            } else {
                *dirty &= !stage_dirty_bit;
            }
        }
    }

    pub fn bind_vs_state(&mut self, ish: Option<Arc<UncompiledShader>>) {
        if let Some(ish) = &ish {
            if self.window_space_position != ish.nir.info.window_space_position {
                self.window_space_position = ish.nir.info.window_space_position;
                self.dirty |= DirtyFlags::CLIP | DirtyFlags::RASTER | DirtyFlags::CC_VIEWPORT;
            }
            if self.vs_needs_edge_flag != ish.needs_edge_flag {
                self.vs_needs_edge_flag = ish.needs_edge_flag;
                self.dirty |= DirtyFlags::VERTEX_BUFFERS | DirtyFlags::VERTEX_ELEMENTS;
            }
        }
        self.bind_shader_state(ish, Stage::Vertex);
    }

    pub fn bind_tcs_state(&mut self, ish: Option<Arc<UncompiledShader>>) {
        self.bind_shader_state(ish, Stage::TessCtrl);
    }

    pub fn bind_tes_state(&mut self, ish: Option<Arc<UncompiledShader>>) {
        //Enabling or disabling optional stages changes the URB layout.
        if ish.is_some() != self.uncompiled[Stage::TessEval.index()].is_some() {
            self.dirty |= DirtyFlags::URB;
        }
        self.bind_shader_state(ish, Stage::TessEval);
    }

    pub fn bind_gs_state(&mut self, ish: Option<Arc<UncompiledShader>>) {
        if ish.is_some() != self.uncompiled[Stage::Geometry.index()].is_some() {
            self.dirty |= DirtyFlags::URB;
        }
        self.bind_shader_state(ish, Stage::Geometry);
    }

    pub fn bind_fs_state(&mut self, ish: Option<Arc<UncompiledShader>>) {
        let color_outputs = |s: &Option<Arc<UncompiledShader>>| {
            s.as_ref().map(|s| s.nir.info.outputs_written & fs_color_bits())
        };
        let old = color_outputs(&self.uncompiled[Stage::Fragment.index()]);
        let new = color_outputs(&ish);
        //Colour outputs decide whether there is a writeable render target.
        if old.is_none() || new.is_none() || old != new {
            self.dirty |= DirtyFlags::PS_BLEND;
        }
        if self.screen.devinfo.ver == 8 {
            self.dirty |= DirtyFlags::PMA_FIX;
        }
        self.bind_shader_state(ish, Stage::Fragment);
    }

    pub fn bind_cs_state(&mut self, ish: Option<Arc<UncompiledShader>>) {
        self.bind_shader_state(ish, Stage::Compute);
    }

    ///Unbinds `ish` if it is bound. The shader and its variants go away with the last reference.
    pub fn delete_shader_state(&mut self, ish: &Arc<UncompiledShader>) {
        let stage = ish.stage();
        let bound = self.uncompiled[stage.index()]
            .as_ref()
            .map_or(false, |b| Arc::ptr_eq(b, ish));
        if bound {
            self.uncompiled[stage.index()] = None;
            self.stage_dirty |= StageDirtyFlags::uncompiled(stage);
        }
    }

    ///The stage feeding stream output and the rasterizer.
    pub fn last_vue_stage(&self) -> Stage {
        if self.uncompiled[Stage::Geometry.index()].is_some() {
            Stage::Geometry
        } else if self.uncompiled[Stage::TessEval.index()].is_some() {
            Stage::TessEval
        } else {
            Stage::Vertex
        }
    }

    fn sampler_key(&self, stage: Stage, ish: &UncompiledShader) -> SamplerKey {
        let devinfo = self.screen.devinfo;
        let info = &ish.nir.info;
        let views = &self.draw.textures[stage.index()];
        let mut key = SamplerKey::default();

        for s in (0..MAX_SAMPLERS).filter(|s| info.textures_used & (1 << s) != 0) {
            let Some(Some(view)) = views.get(s) else {
                continue;
            };
            if view.is_buffer {
                continue;
            }
            if devinfo.verx10 < 75 {
                key.swizzles[s] = view_swizzle(view);
            }

            //Gather from RG32 is broken on gen7.
            if devinfo.ver == 7 && info.uses_texture_gather {
                if matches!(view.format, TexFormat::R32g32Uint | TexFormat::R32g32Sint) {
                    //The format gets overridden to R32G32_FLOAT_LD, alpha and one return float 1.0.
                    let mut channels = [0u16; 4];
                    for (c, channel) in channels.iter_mut().enumerate() {
                        let src = swizzle_channel(key.swizzles[s], c);
                        *channel = if src == SWIZZLE_ONE || src == SWIZZLE_W { SWIZZLE_ONE } else { src };
                    }
                    key.swizzles[s] = make_swizzle(channels);
                }
                if matches!(
                    view.format,
                    TexFormat::R32g32Uint | TexFormat::R32g32Sint | TexFormat::R32g32Float
                ) && devinfo.verx10 < 75
                {
                    //Green channel select doesn't work, blue has to be requested.
                    key.gather_channel_quirk_mask |= 1 << s;
                }
            }

            if devinfo.ver == 6 && info.uses_texture_gather {
                key.gfx6_gather_wa[s] = gfx6_gather_workaround(view.format);
            }
        }

        key
    }

    fn base_key(&self, stage: Stage, ish: &UncompiledShader) -> BaseKey {
        let mut base = BaseKey::new(ish.program_id, self.screen.config.limit_trig_input_range);
        base.tex = self.sampler_key(stage, ish);
        base
    }

    ///User clip planes to lower into `ish`, if it is the last geometry stage and doesn't write clip distances.
    fn userclip_plane_consts(&self, stage: Stage, ish: &UncompiledShader) -> u8 {
        let rast = &self.draw.rasterizer;
        if self.last_vue_stage() == stage && ish.nir.info.clip_distance_array_size == 0 && rast.clip_plane_enable != 0
        {
            rast.num_clip_plane_consts()
        } else {
            0
        }
    }

    fn vs_key(&self, ish: &UncompiledShader) -> VsKey {
        let rast = &self.draw.rasterizer;
        let mut key = VsKey {
            base: self.base_key(Stage::Vertex, ish),
            nr_userclip_plane_consts: self.userclip_plane_consts(Stage::Vertex, ish),
            clamp_pointsize: self.last_vue_stage() == Stage::Vertex
                && ish.nir.info.outputs_written & bit(VARYING_SLOT_PSIZ) != 0,
            ..Default::default()
        };
        if self.screen.devinfo.ver < 6 {
            key.copy_edgeflag = rast.unfilled;
            key.point_coord_replace = rast.sprite_coord_enable;
        }
        key
    }

    ///Per vertex and per patch slots TCS and TES agree on.
    fn unified_tess_slots(&self) -> (u64, u32) {
        let mut per_vertex = 0;
        let mut per_patch = 0;
        if let Some(tes) = &self.uncompiled[Stage::TessEval.index()] {
            per_vertex |= tes.nir.info.inputs_read;
            per_patch |= tes.nir.info.patch_inputs_read;
        }
        if let Some(tcs) = &self.uncompiled[Stage::TessCtrl.index()] {
            per_vertex |= tcs.nir.info.outputs_written;
            per_patch |= tcs.nir.info.patch_outputs_written;
        }
        (per_vertex, per_patch)
    }

    fn tcs_key(&self) -> TcsKey {
        let devinfo = self.screen.devinfo;
        let tcs = self.uncompiled[Stage::TessCtrl.index()].as_deref();
        let tes_tess = self.uncompiled[Stage::TessEval.index()]
            .as_ref()
            .map(|tes| tes.nir.info.tess.clone())
            .unwrap_or_default();
        let (outputs_written, patch_outputs_written) = self.unified_tess_slots();

        let base = match tcs {
            Some(tcs) => self.base_key(Stage::TessCtrl, tcs),
            None => BaseKey::new(0, self.screen.config.limit_trig_input_range),
        };

        TcsKey {
            base,
            tes_primitive_mode: tes_tess.primitive_mode,
            input_vertices: if tcs.is_none() || devinfo.use_tcs_multi_patch() {
                self.draw.vertices_per_patch
            } else {
                0
            },
            outputs_written,
            patch_outputs_written,
            quads_workaround: devinfo.ver < 9
                && tes_tess.primitive_mode == TessPrimitive::Quads
                && tes_tess.spacing == TessSpacing::Equal,
        }
    }

    fn tes_key(&self, ish: &UncompiledShader) -> TesKey {
        let (inputs_read, patch_inputs_read) = self.unified_tess_slots();
        TesKey {
            base: self.base_key(Stage::TessEval, ish),
            nr_userclip_plane_consts: self.userclip_plane_consts(Stage::TessEval, ish),
            inputs_read,
            patch_inputs_read,
        }
    }

    fn gs_key(&self, ish: &UncompiledShader) -> GsKey {
        GsKey {
            base: self.base_key(Stage::Geometry, ish),
            nr_userclip_plane_consts: self.userclip_plane_consts(Stage::Geometry, ish),
        }
    }

    fn fs_key(&self, ish: &UncompiledShader) -> FsKey {
        let info = &ish.nir.info;
        let DrawState {
            rasterizer: rast,
            framebuffer: fb,
            blend,
            depth_stencil_alpha: zsa,
            ..
        } = &self.draw;

        FsKey {
            base: self.base_key(Stage::Fragment, ish),
            nr_color_regions: fb.nr_cbufs,
            flat_shade: rast.flatshade && info.inputs_read & (bit(VARYING_SLOT_COL0) | bit(VARYING_SLOT_COL1)) != 0,
            alpha_test_replicate_alpha: fb.nr_cbufs > 1 && zsa.alpha_enabled,
            alpha_to_coverage: blend.alpha_to_coverage,
            clamp_fragment_color: rast.clamp_fragment_color,
            persample_interp: rast.force_persample_interp,
            multisample_fbo: rast.multisample && fb.samples > 1,
            force_dual_color_blend: blend.dual_color_blending && blend.blend_enables & 1 != 0,
            coherent_fb_fetch: self.screen.devinfo.ver >= 9,
            color_outputs_valid: if self.screen.devinfo.ver < 6 {
                ((1u16 << fb.nr_cbufs.min(8)) - 1) as u8
            } else {
                0
            },
            input_slots_valid: match &self.last_vue_map {
                Some(map) if ish.nos.contains(NosFlags::LAST_VUE_MAP) => map.slots_valid,
                _ => 0,
            },
        }
    }

    fn check_urb_size(&mut self, needed_size: u32, stage: Stage) {
        let last_allocated = self.urb.size[stage.index()];
        //Also reconfigure if shrinking might give a constrained URB more threads.
        if last_allocated < needed_size || (self.urb.constrained && last_allocated > needed_size) {
            self.dirty |= DirtyFlags::URB;
        }
    }

    ///Binds `shader` to `stage` and flags everything that depends on the bound program.
    fn set_prog(&mut self, stage: Stage, shader: Option<Arc<CompiledShader>>) {
        if ptr_eq(&self.prog[stage.index()], &shader) {
            return;
        }

        self.stage_dirty |= StageDirtyFlags::new_variant(stage);
        self.sysvals_need_upload[stage.index()] = true;

        match stage {
            Stage::Vertex => {
                self.dirty |= DirtyFlags::VF_SGVS;
                if let Some(StageProgData::Vs {
                    uses_draw_params,
                    uses_derived_draw_params,
                    needs_sgvs_element,
                    ..
                }) = shader.as_ref().map(|s| &s.prog_data.stage)
                {
                    if self.vs_uses_draw_params != *uses_draw_params
                        || self.vs_uses_derived_draw_params != *uses_derived_draw_params
                        || self.vs_needs_sgvs_element != *needs_sgvs_element
                    {
                        self.dirty |= DirtyFlags::VERTEX_BUFFERS | DirtyFlags::VERTEX_ELEMENTS;
                    }
                    self.vs_uses_draw_params = *uses_draw_params;
                    self.vs_uses_derived_draw_params = *uses_derived_draw_params;
                    self.vs_needs_sgvs_element = *needs_sgvs_element;
                }
            }
            Stage::Fragment => {
                self.dirty |= DirtyFlags::WM | DirtyFlags::CLIP | DirtyFlags::SBE;
            }
            _ => {}
        }

        if stage.is_vue() {
            let urb_entry_size = shader
                .as_ref()
                .and_then(|s| s.prog_data.stage.vue())
                .map_or(0, |vue| vue.urb_entry_size);
            self.check_urb_size(urb_entry_size, stage);
        }

        self.prog[stage.index()] = shader;
    }

    fn update_stage(&mut self, stage: Stage, key: impl FnOnce(&Self, &UncompiledShader) -> ShaderKey) -> Result<(), DriverError> {
        let Some(ish) = self.uncompiled[stage.index()].clone() else {
            self.set_prog(stage, None);
            return Ok(());
        };
        let key = key(self, &*ish);
        let input_vue_map = if stage == Stage::Fragment {
            self.last_vue_map.as_ref()
        } else {
            None
        };
        let shader = self.screen.find_or_compile_variant(&ish, &key, input_vue_map)?;
        self.set_prog(stage, shader);
        Ok(())
    }

    fn update_tcs(&mut self) -> Result<(), DriverError> {
        let key = ShaderKey::Tcs(self.tcs_key());
        let shader = match self.uncompiled[Stage::TessCtrl.index()].clone() {
            Some(tcs) => self.screen.find_or_compile_variant(&tcs, &key, None)?,
            None => self.screen.find_or_compile_passthrough_tcs(&key)?,
        };
        self.set_prog(Stage::TessCtrl, shader);
        Ok(())
    }

    fn update_tes(&mut self) -> Result<(), DriverError> {
        self.update_stage(Stage::TessEval, |ctx, ish| ShaderKey::Tes(ctx.tes_key(ish)))?;

        if let Some(tes) = &self.uncompiled[Stage::TessEval.index()] {
            if tes.nir.count_intrinsics(|op| *op == Intrinsic::LoadPatchVerticesIn) > 0 {
                self.stage_dirty |= StageDirtyFlags::CONSTANTS_TES;
                self.sysvals_need_upload[Stage::TessEval.index()] = true;
            }
        }
        Ok(())
    }

    fn update_output_topology(&mut self) {
        let points_or_lines = if let Some(gs) = self.prog(Stage::Geometry) {
            matches!(
                gs.prog_data.stage,
                StageProgData::Gs {
                    output_topology: OutputPrimitive::Points | OutputPrimitive::LineStrip,
                    ..
                }
            )
        } else if let Some(tes) = self.prog(Stage::TessEval) {
            matches!(
                tes.prog_data.stage,
                StageProgData::Tes {
                    output_topology: TessOutputTopology::Point | TessOutputTopology::Line,
                    ..
                }
            )
        } else {
            false
        };

        if self.output_topology_is_points_or_lines != points_or_lines {
            //Feeds the XY clip enables.
            self.output_topology_is_points_or_lines = points_or_lines;
            self.dirty |= DirtyFlags::CLIP | DirtyFlags::RASTER;
        }
    }

    fn update_last_vue_map(&mut self, shader: &CompiledShader) {
        let Some(vue) = shader.prog_data.stage.vue() else {
            return;
        };
        let vue_map = &vue.vue_map;
        let ver = self.screen.devinfo.ver;
        let old_slots = self.last_vue_map.as_ref().map_or(0, |m| m.slots_valid);
        let changed_slots = old_slots ^ vue_map.slots_valid;

        if changed_slots & bit(VARYING_SLOT_VIEWPORT) != 0 {
            self.num_viewports = if vue_map.slots_valid & bit(VARYING_SLOT_VIEWPORT) != 0 {
                MAX_VIEWPORTS
            } else {
                1
            };
            self.dirty |=
                DirtyFlags::CLIP | DirtyFlags::SF_CL_VIEWPORT | DirtyFlags::CC_VIEWPORT | DirtyFlags::SCISSOR;
            if ver < 6 {
                self.dirty |= DirtyFlags::GEN4_CLIP_PROG | DirtyFlags::GEN4_SF_PROG;
            }
            self.stage_dirty |= StageDirtyFlags::UNCOMPILED_FS;
        }

        let separate_changed = self
            .last_vue_map
            .as_ref()
            .map_or(false, |m| m.separate != vue_map.separate);
        if changed_slots != 0 || separate_changed {
            self.dirty |= DirtyFlags::SBE;
            if ver <= 6 {
                self.dirty |= DirtyFlags::GEN4_FF_GS_PROG;
            }
            self.nos_changed(NosFlags::LAST_VUE_MAP);
        }

        self.last_vue_map = Some(vue_map.clone());
    }

    fn update_pull_constant_descriptors(&mut self, stage: Stage) {
        let Some(shader) = self.prog(stage) else {
            return;
        };
        if shader.prog_data.has_ubo_pull
            && !shader.system_values.is_empty()
            && self.sysvals_need_upload[stage.index()]
        {
            self.stage_dirty |= StageDirtyFlags::bindings(stage);
        }
    }

    fn handle_cache_events(&mut self) {
        let events = self.screen.cache.take_events();
        if events.contains(CacheEvents::BASE_ADDRESS_CHANGED) {
            self.dirty |= DirtyFlags::STATE_BASE_ADDRESS;
        }
        if events.contains(CacheEvents::REEMIT_ALL_SHADERS) {
            for stage in Stage::ALL {
                self.stage_dirty |= StageDirtyFlags::variant(stage);
            }
        }
    }

    ///Makes sure the bound variants match the current state. Called before every draw.
    ///
    /// Returns `false` if a stage the draw needs has no usable variant, the draw must be skipped then.
    pub fn update_compiled_shaders(&mut self) -> Result<bool, DriverError> {
        let stage_dirty = self.stage_dirty;

        if stage_dirty.intersects(StageDirtyFlags::UNCOMPILED_TCS | StageDirtyFlags::UNCOMPILED_TES) {
            if self.uncompiled[Stage::TessEval.index()].is_some() {
                self.update_tcs()?;
                self.update_tes()?;
            } else {
                self.set_prog(Stage::TessCtrl, None);
                self.set_prog(Stage::TessEval, None);
                self.stage_dirty |=
                    StageDirtyFlags::new_variant(Stage::TessCtrl) | StageDirtyFlags::new_variant(Stage::TessEval);
                if self.urb.constrained {
                    self.dirty |= DirtyFlags::URB;
                }
            }
        }

        if stage_dirty.contains(StageDirtyFlags::UNCOMPILED_VS) {
            self.update_stage(Stage::Vertex, |ctx, ish| ShaderKey::Vs(ctx.vs_key(ish)))?;
        }
        if stage_dirty.contains(StageDirtyFlags::UNCOMPILED_GS) {
            self.update_stage(Stage::Geometry, |ctx, ish| ShaderKey::Gs(ctx.gs_key(ish)))?;
        }

        if stage_dirty.intersects(StageDirtyFlags::UNCOMPILED_GS | StageDirtyFlags::UNCOMPILED_TES) {
            self.update_output_topology();
        }

        self.handle_cache_events();

        //Every bound geometry stage needs a variant before the VUE map can be looked at.
        for stage in [Stage::Vertex, Stage::TessEval, Stage::Geometry] {
            if (stage == Stage::Vertex || self.uncompiled[stage.index()].is_some()) && self.prog(stage).is_none() {
                log::warn!("Skipping draw, no usable {} shader", stage.name());
                return Ok(false);
            }
        }
        if self.uncompiled[Stage::TessEval.index()].is_some() && self.prog(Stage::TessCtrl).is_none() {
            log::warn!("Skipping draw, no usable tessellation control shader");
            return Ok(false);
        }

        let last_stage = self.last_vue_stage();
        let Some(shader) = self.prog[last_stage.index()].clone() else {
            return Ok(false);
        };
        self.update_last_vue_map(&shader);
        if self.streamout != shader.streamout {
            self.streamout = shader.streamout.clone();
            self.dirty |= DirtyFlags::SO_DECL_LIST | DirtyFlags::STREAMOUT;
        }

        //The VUE map update above may have flagged the fragment shader.
        if self.stage_dirty.contains(StageDirtyFlags::UNCOMPILED_FS) {
            self.update_stage(Stage::Fragment, |ctx, ish| ShaderKey::Fs(ctx.fs_key(ish)))?;
            self.handle_cache_events();
        }
        if self.uncompiled[Stage::Fragment.index()].is_some() && self.prog(Stage::Fragment).is_none() {
            log::warn!("Skipping draw, no usable fragment shader");
            return Ok(false);
        }

        for stage in [Stage::Vertex, Stage::TessCtrl, Stage::TessEval, Stage::Geometry, Stage::Fragment] {
            if self.stage_dirty.contains(StageDirtyFlags::constants(stage)) {
                self.update_pull_constant_descriptors(stage);
            }
        }

        Ok(true)
    }

    ///Compute counterpart of [Self::update_compiled_shaders].
    pub fn update_compiled_compute_shader(&mut self) -> Result<bool, DriverError> {
        if self.stage_dirty.contains(StageDirtyFlags::UNCOMPILED_CS) {
            self.update_stage(Stage::Compute, |ctx, ish| {
                ShaderKey::Cs(CsKey {
                    base: ctx.base_key(Stage::Compute, ish),
                })
            })?;
            self.handle_cache_events();
        }

        if self.prog(Stage::Compute).is_none() {
            log::warn!("Skipping dispatch, no usable compute shader");
            return Ok(false);
        }
        if self.stage_dirty.contains(StageDirtyFlags::CONSTANTS_CS) {
            self.update_pull_constant_descriptors(Stage::Compute);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_workarounds_per_format() {
        assert_eq!(gfx6_gather_workaround(TexFormat::R8Sint), WA_SIGN | WA_8BIT);
        assert_eq!(gfx6_gather_workaround(TexFormat::R16Uint), WA_16BIT);
        assert_eq!(gfx6_gather_workaround(TexFormat::Rgba8Unorm), 0, "no workaround for regular formats");
    }

    #[test]
    fn last_sampler_bit() {
        assert_eq!(last_bit(0), 0);
        assert_eq!(last_bit(0b1), 1);
        assert_eq!(last_bit(0b1001_0000), 8);
    }
}
