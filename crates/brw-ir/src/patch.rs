mod clip_planes;
mod edge_flag;
mod fold_constants;
mod fs_outputs;
mod point_size;
mod tex_swizzle;

pub use clip_planes::LowerClipPlanes;
pub use edge_flag::{DefaultEdgeFlag, FixEdgeFlags};
pub use fold_constants::FoldConstants;
pub use fs_outputs::LowerFsOutputs;
pub use point_size::ClampPointSize;
pub use tex_swizzle::{
    make_swizzle, swizzle_channel, LowerTexSwizzle, SWIZZLE_NOOP, SWIZZLE_ONE, SWIZZLE_ZERO,
};

use crate::shader::Shader;

pub trait Patch {
    type Err: std::error::Error;

    ///Called whenever the patch should be applied to the shader.
    fn patch_shader(&mut self, shader: Shader) -> Result<Shader, Self::Err>;
}

///Chains patches on a shader.
///
/// `shader.patch().patch(A)?.patch(B)?.unwrap_shader()`
pub struct Patcher {
    shader: Shader,
}

impl Patcher {
    pub fn new(shader: Shader) -> Self {
        Patcher { shader }
    }

    pub fn patch<P: Patch>(self, mut patch: P) -> Result<Self, P::Err> {
        let shader = patch.patch_shader(self.shader)?;
        Ok(Patcher { shader })
    }

    ///Like [Self::patch], but keeps the patch around so results can be read back.
    pub fn patch_ref<P: Patch>(self, patch: &mut P) -> Result<Self, P::Err> {
        let shader = patch.patch_shader(self.shader)?;
        Ok(Patcher { shader })
    }

    pub fn shader(&self) -> &Shader {
        &self.shader
    }

    pub fn unwrap_shader(self) -> Shader {
        self.shader
    }
}
