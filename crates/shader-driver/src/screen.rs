use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use brw_ir::{
    patch::FixEdgeFlags,
    slots::{bit, fs_color_bits, FS_VARYING_INPUT_MASK, VERT_ATTRIB_EDGEFLAG},
    Shader, Stage, TessPrimitive,
};
use variant_cache::{disk_key, DiskCache, ProgramCache, ProgramCacheConfig};

use crate::{
    backend::Backend,
    compile::compile_variant,
    config::DriverConfig,
    keys::{BaseKey, FsKey, ShaderKey, TcsKey, TesKey},
    pool::CompilePool,
    shader::{update_so_info, CompiledShader, DiskEntry, StreamOutputInfo, UncompiledShader, Variant, VariantList},
    state::{NosFlags, VueMap},
    DriverError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    ///Hardware generation, 4 to 12.
    pub ver: u32,
    ///Generation times ten, 75 for Haswell.
    pub verx10: u32,
}

impl DeviceInfo {
    pub fn new(ver: u32) -> Self {
        DeviceInfo { ver, verx10: ver * 10 }
    }

    pub fn haswell() -> Self {
        DeviceInfo { ver: 7, verx10: 75 }
    }

    ///Sandybridge can not push UBO ranges.
    pub fn can_push_ubo(&self) -> bool {
        self.ver != 6
    }

    ///TCS compiled in multi patch mode need the input patch size in their key.
    pub fn use_tcs_multi_patch(&self) -> bool {
        self.ver >= 12
    }
}

///State shared by all contexts of one device.
pub struct Screen {
    pub config: DriverConfig,
    pub devinfo: DeviceInfo,
    pub(crate) backend: Arc<dyn Backend>,
    program_id: AtomicU32,
    pub cache: ProgramCache<CompiledShader>,
    pub(crate) disk_cache: Option<Arc<dyn DiskCache>>,
    ///Passthrough TCS variants. They have no uncompiled shader to hang off.
    passthrough_tcs: VariantList,
    pool: CompilePool,
}

impl Screen {
    pub fn new(
        config: DriverConfig,
        devinfo: DeviceInfo,
        backend: Arc<dyn Backend>,
        disk_cache: Option<Arc<dyn DiskCache>>,
    ) -> Arc<Self> {
        log::info!(
            "Creating screen for gen{} (verx10 {}), {:?}",
            devinfo.ver,
            devinfo.verx10,
            config
        );
        let pool = CompilePool::new(config.compiler_threads);
        Arc::new(Screen {
            cache: ProgramCache::new(ProgramCacheConfig::for_gen(devinfo.ver)),
            config,
            devinfo,
            backend,
            program_id: AtomicU32::new(0),
            disk_cache,
            passthrough_tcs: VariantList::new(),
            pool,
        })
    }

    pub fn next_program_id(&self) -> u32 {
        self.program_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    ///Disk cache, if one is attached and enabled.
    pub(crate) fn disk(&self) -> Option<&dyn DiskCache> {
        if self.config.disk_cache {
            self.disk_cache.as_deref()
        } else {
            None
        }
    }

    ///Creates a graphics shader. With precompiling enabled, a variant with the default key is compiled in the
    /// background.
    pub fn create_shader(
        self: &Arc<Self>,
        nir: Shader,
        so_info: Option<StreamOutputInfo>,
    ) -> Result<Arc<UncompiledShader>, DriverError> {
        let ish = Arc::new(self.create_uncompiled_shader(nir, so_info, 0)?);
        if self.config.precompile {
            self.precompile(&ish)?;
        }
        Ok(ish)
    }

    pub fn create_compute_shader(
        self: &Arc<Self>,
        nir: Shader,
        kernel_input_size: u32,
    ) -> Result<Arc<UncompiledShader>, DriverError> {
        if nir.stage != Stage::Compute {
            return Err(brw_ir::IrError::WrongStage {
                pass: "create_compute_shader",
                found: nir.stage,
            }
            .into());
        }
        let ish = Arc::new(self.create_uncompiled_shader(nir, None, kernel_input_size)?);
        if self.config.precompile {
            self.precompile(&ish)?;
        }
        Ok(ish)
    }

    fn create_uncompiled_shader(
        &self,
        mut nir: Shader,
        so_info: Option<StreamOutputInfo>,
        kernel_input_size: u32,
    ) -> Result<UncompiledShader, DriverError> {
        let stage = nir.stage;

        let mut needs_edge_flag = false;
        if stage == Stage::Vertex {
            if self.devinfo.ver >= 6 {
                let mut fix = FixEdgeFlags::default();
                nir = nir.patch().patch_ref(&mut fix)?.unwrap_shader();
                needs_edge_flag = fix.fixed > 0;
            } else {
                needs_edge_flag = nir.info.inputs_read & bit(VERT_ATTRIB_EDGEFLAG) != 0;
            }
        }

        let mut stream_output = so_info.unwrap_or_default();
        update_so_info(&mut stream_output, nir.info.outputs_written);

        let nos = self.nos_for(&nir);
        let source_hash = nir.source_hash()?;
        let program_id = self.next_program_id();
        log::debug!(
            "Created {} shader {} ({}), nos {:?}",
            stage.name(),
            program_id,
            nir.info.name.as_deref().unwrap_or("unnamed"),
            nos
        );

        Ok(UncompiledShader {
            program_id,
            nir,
            stream_output,
            nos,
            source_hash,
            kernel_input_size,
            needs_edge_flag,
            variants: VariantList::new(),
        })
    }

    ///State the variants of `nir` are keyed on.
    fn nos_for(&self, nir: &Shader) -> NosFlags {
        let info = &nir.info;
        let mut nos = NosFlags::empty();

        //Texture swizzles are lowered in the shader without shader channel select.
        if self.devinfo.verx10 < 75 && info.textures_used != 0 {
            nos |= NosFlags::TEXTURES;
        }

        match nir.stage {
            Stage::Vertex => {
                if info.clip_distance_array_size == 0 || self.devinfo.ver < 6 {
                    nos |= NosFlags::RASTERIZER;
                }
                if self.devinfo.ver < 8 {
                    nos |= NosFlags::VERTEX_ELEMENTS;
                }
            }
            Stage::TessEval | Stage::Geometry => {
                if info.clip_distance_array_size == 0 {
                    nos |= NosFlags::RASTERIZER;
                }
            }
            Stage::Fragment => {
                nos |= NosFlags::FRAMEBUFFER
                    | NosFlags::DEPTH_STENCIL_ALPHA
                    | NosFlags::RASTERIZER
                    | NosFlags::BLEND;
                if (info.inputs_read & FS_VARYING_INPUT_MASK).count_ones() > 16 {
                    nos |= NosFlags::LAST_VUE_MAP;
                }
            }
            Stage::TessCtrl | Stage::Compute => {}
        }
        nos
    }

    ///Key used for the precompile, a guess of the most likely draw time state.
    pub fn default_key(&self, ish: &UncompiledShader) -> ShaderKey {
        let info = &ish.nir.info;
        let base = BaseKey::new(ish.program_id, self.config.limit_trig_input_range);
        match ish.stage() {
            Stage::TessCtrl => ShaderKey::Tcs(TcsKey {
                base,
                tes_primitive_mode: match info.tess.primitive_mode {
                    TessPrimitive::Unspecified => TessPrimitive::Triangles,
                    mode => mode,
                },
                input_vertices: if self.devinfo.use_tcs_multi_patch() {
                    info.tess.tcs_vertices_out
                } else {
                    0
                },
                outputs_written: info.outputs_written,
                patch_outputs_written: info.patch_outputs_written,
                quads_workaround: false,
            }),
            Stage::TessEval => ShaderKey::Tes(TesKey {
                base,
                inputs_read: info.inputs_read,
                patch_inputs_read: info.patch_inputs_read,
                ..Default::default()
            }),
            Stage::Fragment => {
                let can_rearrange_varyings = (info.inputs_read & FS_VARYING_INPUT_MASK).count_ones() <= 16;
                ShaderKey::Fs(FsKey {
                    base,
                    nr_color_regions: (info.outputs_written & fs_color_bits()).count_ones() as u8,
                    coherent_fb_fetch: self.devinfo.ver >= 9,
                    input_slots_valid: if can_rearrange_varyings {
                        0
                    } else {
                        info.inputs_read | bit(brw_ir::slots::VARYING_SLOT_POS)
                    },
                    ..Default::default()
                })
            }
            stage => ShaderKey::default_for(stage, base),
        }
    }

    fn precompile(self: &Arc<Self>, ish: &Arc<UncompiledShader>) -> Result<(), DriverError> {
        let key = self.default_key(ish);
        let (variant, added) = ish.variants.find_or_add(&key);
        if !added {
            return Ok(());
        }

        match self.retrieve_from_disk(ish, &variant) {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(e) => {
                variant.complete(None);
                return Err(e);
            }
        }

        let screen = self.clone();
        let job_ish = ish.clone();
        let job_variant = variant.clone();
        self.pool.schedule(Box::new(move || {
            if let Err(e) = screen.compile_and_complete(&job_ish, &job_variant, None) {
                log::error!("Precompile of program {} failed: {}", job_ish.program_id, e);
            }
        }));

        if self.config.sync_compile {
            variant.wait();
        }
        Ok(())
    }

    ///Returns the variant of `ish` for `key`, compiling it if no context did so before.
    ///
    /// `Ok(None)` means the variant can't be compiled, now or later.
    pub fn find_or_compile_variant(
        &self,
        ish: &UncompiledShader,
        key: &ShaderKey,
        input_vue_map: Option<&VueMap>,
    ) -> Result<Option<Arc<CompiledShader>>, DriverError> {
        let (variant, added) = ish.variants.find_or_add(key);
        if !added {
            return Ok(variant.wait());
        }

        let res = self.resolve_new_variant(ish, &variant, input_vue_map);
        //Waiters must never block on a variant nobody is going to complete.
        if !variant.is_ready() {
            variant.complete(None);
        }
        res
    }

    ///Returns the passthrough TCS for `key`, the TCS used when only a TES is bound.
    ///
    /// Like user shader variants, each key is compiled at most once and a failed compile is not retried.
    pub fn find_or_compile_passthrough_tcs(&self, key: &ShaderKey) -> Result<Option<Arc<CompiledShader>>, DriverError> {
        let (variant, added) = self.passthrough_tcs.find_or_add(key);
        if !added {
            return Ok(variant.wait());
        }

        let res = self.resolve_passthrough_tcs(&variant);
        if !variant.is_ready() {
            variant.complete(None);
        }
        res
    }

    fn resolve_passthrough_tcs(&self, variant: &Variant) -> Result<Option<Arc<CompiledShader>>, DriverError> {
        if let Some(shader) = self.cache.find(variant.key.cache_id(), &variant.key.to_bytes()?) {
            variant.complete(Some(shader.clone()));
            return Ok(Some(shader));
        }

        match compile_variant(self, None, &variant.key, None) {
            Ok(shader) => {
                variant.complete(Some(shader.clone()));
                Ok(Some(shader))
            }
            Err(DriverError::Compile { message, .. }) => {
                log::error!("Failed to compile passthrough TCS: {}", message);
                variant.complete(None);
                Ok(None)
            }
            Err(e) => {
                variant.complete(None);
                Err(e)
            }
        }
    }

    fn resolve_new_variant(
        &self,
        ish: &UncompiledShader,
        variant: &Variant,
        input_vue_map: Option<&VueMap>,
    ) -> Result<Option<Arc<CompiledShader>>, DriverError> {
        if let Some(shader) = self.cache.find(variant.key.cache_id(), &variant.key.to_bytes()?) {
            variant.complete(Some(shader.clone()));
            return Ok(Some(shader));
        }

        if let Some(shader) = self.retrieve_from_disk(ish, variant)? {
            return Ok(Some(shader));
        }

        self.compile_and_complete(ish, variant, input_vue_map)
    }

    ///Compiles `variant` and publishes the result. Backend failures complete the variant as failed and are not an
    /// error.
    fn compile_and_complete(
        &self,
        ish: &UncompiledShader,
        variant: &Variant,
        input_vue_map: Option<&VueMap>,
    ) -> Result<Option<Arc<CompiledShader>>, DriverError> {
        if ish.variants.len() > 1 {
            self.debug_recompile(ish, &variant.key);
        }

        match compile_variant(self, Some(ish), &variant.key, input_vue_map) {
            Ok(shader) => {
                variant.complete(Some(shader.clone()));
                Ok(Some(shader))
            }
            Err(DriverError::Compile { stage, message }) => {
                log::error!(
                    "Failed to compile {} shader of program {}: {}",
                    stage.name(),
                    ish.program_id,
                    message
                );
                variant.complete(None);
                Ok(None)
            }
            Err(e) => {
                variant.complete(None);
                Err(e)
            }
        }
    }

    fn debug_recompile(&self, ish: &UncompiledShader, key: &ShaderKey) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let Some(first) = ish.variants.first() else {
            return;
        };
        let info = &ish.nir.info;
        log::debug!(
            "Recompiling {} shader for program {}: {}",
            ish.stage().name(),
            info.name.as_deref().unwrap_or("(no identifier)"),
            info.label.as_deref().unwrap_or("")
        );

        match crate::keys::key_diff(&first.key.sanitized(), &key.sanitized()) {
            Ok(changes) => {
                for change in changes {
                    log::debug!("  {} {}->{}", change.field, change.old, change.new);
                }
            }
            Err(e) => log::warn!("Could not compare keys: {}", e),
        }
    }

    ///Key bytes used for the disk cache. Program ids are not stable across processes and are left out.
    ///
    /// The cache may be shared by several devices and configurations, so the device generation and the binding
    /// table layout mode are part of the key.
    pub(crate) fn disk_key_for(&self, ish_hash: &[u8; 32], key: &ShaderKey) -> Result<[u8; 32], DriverError> {
        let mut key = key.clone();
        key.base_mut().program_string_id = 0;

        let mut bytes = self.devinfo.verx10.to_le_bytes().to_vec();
        bytes.push(u8::from(self.config.disable_compact_binding_table));
        bytes.extend_from_slice(&key.to_bytes()?);
        Ok(disk_key(ish_hash, key.cache_id(), &bytes))
    }

    ///Loads `variant` from the disk cache, skipping the backend.
    fn retrieve_from_disk(
        &self,
        ish: &UncompiledShader,
        variant: &Variant,
    ) -> Result<Option<Arc<CompiledShader>>, DriverError> {
        let Some(disk) = self.disk() else {
            return Ok(None);
        };

        let dk = self.disk_key_for(&ish.source_hash, &variant.key)?;
        let Some(blob) = disk.retrieve(&dk) else {
            return Ok(None);
        };

        let entry: DiskEntry = match serde_json::from_slice(&blob) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Ignoring corrupt disk cache entry of program {}: {}", ish.program_id, e);
                return Ok(None);
            }
        };

        let key = variant.key.clone();
        let shader = self.cache.insert(key.cache_id(), &key.to_bytes()?, &entry.assembly, |kernel| {
            CompiledShader {
                stage: key.stage(),
                key: key.clone(),
                kernel,
                prog_data: entry.prog_data,
                streamout: entry.streamout,
                system_values: entry.system_values,
                kernel_input_size: entry.kernel_input_size,
                num_cbufs: entry.num_cbufs,
                bt: entry.bt,
            }
        })?;

        log::debug!(
            "Loaded {} shader of program {} from the disk cache",
            shader.stage.name(),
            ish.program_id
        );
        variant.complete(Some(shader.clone()));
        Ok(Some(shader))
    }

    ///True once the background precompile of `ish` finished.
    pub fn is_parallel_shader_compilation_finished(&self, ish: &UncompiledShader) -> bool {
        if !self.config.precompile {
            return true;
        }
        ish.variants.first().map_or(true, |v| v.is_ready())
    }
}
