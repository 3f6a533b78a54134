//! Program keys.
//!
//! A key holds every piece of state a compiled variant depends on. Keys are plain data with derived equality, the
//! cache looks them up by their serialized bytes (see [ShaderKey::to_bytes]), which are produced from the fields
//! alone and therefore never depend on padding.

use brw_ir::{patch::SWIZZLE_NOOP, Stage, TessPrimitive};
use patch_binding_table::GatherWorkarounds;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use variant_cache::CacheId;

pub const MAX_SAMPLERS: usize = 32;

///Texturing workarounds baked into a variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerKey {
    ///Per unit texture swizzle, only used on hardware without shader channel select.
    pub swizzles: [u16; MAX_SAMPLERS],
    pub gather_channel_quirk_mask: u32,
    pub gfx6_gather_wa: [u8; MAX_SAMPLERS],
    ///Units with GL_CLAMP wrap modes, per coordinate.
    pub gl_clamp_mask: [u32; 3],
}

impl Default for SamplerKey {
    fn default() -> Self {
        SamplerKey {
            swizzles: [SWIZZLE_NOOP; MAX_SAMPLERS],
            gather_channel_quirk_mask: 0,
            gfx6_gather_wa: [0; MAX_SAMPLERS],
            gl_clamp_mask: [0; 3],
        }
    }
}

impl SamplerKey {
    ///Resets the workarounds that are applied in the IR before the backend sees the shader.
    pub fn sanitize(&mut self) {
        self.swizzles = [SWIZZLE_NOOP; MAX_SAMPLERS];
        self.gather_channel_quirk_mask = 0;
        self.gfx6_gather_wa = [0; MAX_SAMPLERS];
    }

    pub fn gather_workarounds(&self) -> GatherWorkarounds {
        GatherWorkarounds {
            channel_quirk_mask: self.gather_channel_quirk_mask,
            gfx6_gather_wa: self.gfx6_gather_wa,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseKey {
    pub program_string_id: u32,
    pub limit_trig_input_range: bool,
    pub tex: SamplerKey,
}

impl BaseKey {
    pub fn new(program_string_id: u32, limit_trig_input_range: bool) -> Self {
        BaseKey {
            program_string_id,
            limit_trig_input_range,
            tex: SamplerKey::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VsKey {
    pub base: BaseKey,
    ///Planes `0..n` are lowered to clip distances.
    pub nr_userclip_plane_consts: u8,
    pub clamp_pointsize: bool,
    ///Gen4/5: the edge flag is passed through the VUE.
    pub copy_edgeflag: bool,
    ///Gen4/5: texture coordinates replaced by point sprite coordinates.
    pub point_coord_replace: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcsKey {
    pub base: BaseKey,
    pub tes_primitive_mode: TessPrimitive,
    pub input_vertices: u8,
    pub outputs_written: u64,
    pub patch_outputs_written: u32,
    pub quads_workaround: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TesKey {
    pub base: BaseKey,
    pub nr_userclip_plane_consts: u8,
    pub inputs_read: u64,
    pub patch_inputs_read: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GsKey {
    pub base: BaseKey,
    pub nr_userclip_plane_consts: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FsKey {
    pub base: BaseKey,
    pub nr_color_regions: u8,
    pub flat_shade: bool,
    pub alpha_test_replicate_alpha: bool,
    pub alpha_to_coverage: bool,
    pub clamp_fragment_color: bool,
    pub persample_interp: bool,
    pub multisample_fbo: bool,
    pub force_dual_color_blend: bool,
    pub coherent_fb_fetch: bool,
    pub color_outputs_valid: u8,
    ///VUE slots written by the previous stage. Only set when the shader reads more than 16 varyings.
    pub input_slots_valid: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsKey {
    pub base: BaseKey,
}

///Key of any stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderKey {
    Vs(VsKey),
    Tcs(TcsKey),
    Tes(TesKey),
    Gs(GsKey),
    Fs(FsKey),
    Cs(CsKey),
}

impl ShaderKey {
    ///Default key of a stage, used by the precompile.
    pub fn default_for(stage: Stage, base: BaseKey) -> Self {
        match stage {
            Stage::Vertex => ShaderKey::Vs(VsKey {
                base,
                ..Default::default()
            }),
            Stage::TessCtrl => ShaderKey::Tcs(TcsKey {
                base,
                ..Default::default()
            }),
            Stage::TessEval => ShaderKey::Tes(TesKey {
                base,
                ..Default::default()
            }),
            Stage::Geometry => ShaderKey::Gs(GsKey {
                base,
                ..Default::default()
            }),
            Stage::Fragment => ShaderKey::Fs(FsKey {
                base,
                ..Default::default()
            }),
            Stage::Compute => ShaderKey::Cs(CsKey { base }),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ShaderKey::Vs(_) => Stage::Vertex,
            ShaderKey::Tcs(_) => Stage::TessCtrl,
            ShaderKey::Tes(_) => Stage::TessEval,
            ShaderKey::Gs(_) => Stage::Geometry,
            ShaderKey::Fs(_) => Stage::Fragment,
            ShaderKey::Cs(_) => Stage::Compute,
        }
    }

    pub fn cache_id(&self) -> CacheId {
        cache_id(self.stage())
    }

    pub fn base(&self) -> &BaseKey {
        match self {
            ShaderKey::Vs(k) => &k.base,
            ShaderKey::Tcs(k) => &k.base,
            ShaderKey::Tes(k) => &k.base,
            ShaderKey::Gs(k) => &k.base,
            ShaderKey::Fs(k) => &k.base,
            ShaderKey::Cs(k) => &k.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseKey {
        match self {
            ShaderKey::Vs(k) => &mut k.base,
            ShaderKey::Tcs(k) => &mut k.base,
            ShaderKey::Tes(k) => &mut k.base,
            ShaderKey::Gs(k) => &mut k.base,
            ShaderKey::Fs(k) => &mut k.base,
            ShaderKey::Cs(k) => &mut k.base,
        }
    }

    ///Deterministic byte representation used as the cache key.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    ///Copy of the key as the backend gets to see it.
    ///
    /// Everything that was already lowered in the IR is reset, so that two variants differing only in those fields
    /// look the same to the backend.
    pub fn sanitized(&self) -> ShaderKey {
        let mut key = self.clone();
        key.base_mut().tex.sanitize();
        match &mut key {
            ShaderKey::Vs(vs) => {
                vs.nr_userclip_plane_consts = 0;
                vs.copy_edgeflag = false;
            }
            ShaderKey::Tes(tes) => tes.nr_userclip_plane_consts = 0,
            ShaderKey::Gs(gs) => gs.nr_userclip_plane_consts = 0,
            ShaderKey::Tcs(_) | ShaderKey::Fs(_) | ShaderKey::Cs(_) => {}
        }
        key
    }
}

pub fn cache_id(stage: Stage) -> CacheId {
    match stage {
        Stage::Vertex => CacheId::Vs,
        Stage::TessCtrl => CacheId::Tcs,
        Stage::TessEval => CacheId::Tes,
        Stage::Geometry => CacheId::Gs,
        Stage::Fragment => CacheId::Fs,
        Stage::Compute => CacheId::Cs,
    }
}

///A field that differs between two keys.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyChange {
    ///Dotted path of the field, e.g. `base.tex.swizzles.3`.
    pub field: String,
    pub old: String,
    pub new: String,
}

///Lists the fields that differ between two keys of the same stage.
pub fn key_diff(old: &ShaderKey, new: &ShaderKey) -> Result<Vec<KeyChange>, serde_json::Error> {
    let old = serde_json::to_value(old)?;
    let new = serde_json::to_value(new)?;
    let mut changes = Vec::new();
    diff_values("", &old, &new, &mut changes);
    Ok(changes)
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_owned()
    } else {
        format!("{}.{}", path, field)
    }
}

fn diff_values(path: &str, old: &Value, new: &Value, changes: &mut Vec<KeyChange>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (field, va) in a {
                match b.get(field) {
                    Some(vb) => diff_values(&join(path, field), va, vb, changes),
                    None => changes.push(KeyChange {
                        field: join(path, field),
                        old: va.to_string(),
                        new: "-".to_owned(),
                    }),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (va, vb)) in a.iter().zip(b).enumerate() {
                diff_values(&join(path, &i.to_string()), va, vb, changes);
            }
        }
        (a, b) if a != b => changes.push(KeyChange {
            field: path.to_owned(),
            old: a.to_string(),
            new: b.to_string(),
        }),
        _ => {}
    }
}
