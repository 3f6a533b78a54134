//! Edge flag handling for pre-gen6 vertex shaders.
//!
//! The fixed function clipper of gen4/5 reads the edge flag from the VUE. Apps that don't pass an edge flag
//! attribute still need a valid value there, so a default of `1.0` is written. Shaders that come with
//! their own edge flag passthrough have it stripped again when the hardware copies it directly.

use std::convert::Infallible;

use crate::{
    shader::{Instr, Intrinsic, Shader, Src, Stage},
    slots::{bit, VARYING_SLOT_EDGE, VERT_ATTRIB_EDGEFLAG},
    Builder, IrError,
};

use super::Patch;

///Writes `1.0` to the edge flag output.
pub struct DefaultEdgeFlag;

impl Patch for DefaultEdgeFlag {
    type Err = IrError;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        if shader.stage != Stage::Vertex {
            return Err(IrError::WrongStage {
                pass: "DefaultEdgeFlag",
                found: shader.stage,
            });
        }

        Builder::new(&mut shader).store_output(VARYING_SLOT_EDGE, 0, Src::float(1.0));
        Ok(shader)
    }
}

///Removes the edge flag output, and the edge flag attribute if nothing else reads it.
#[derive(Default)]
pub struct FixEdgeFlags {
    ///Number of removed stores.
    pub fixed: usize,
}

impl Patch for FixEdgeFlags {
    type Err = Infallible;

    fn patch_shader(&mut self, mut shader: Shader) -> Result<Shader, Self::Err> {
        self.fixed = 0;
        //Only vertex shaders forward edge flags.
        if shader.stage != Stage::Vertex {
            return Ok(shader);
        }

        let before = shader.instrs.len();
        shader.instrs.retain(|i| {
            !matches!(
                i,
                Instr::Intrinsic {
                    op: Intrinsic::StoreOutput {
                        location: VARYING_SLOT_EDGE,
                        ..
                    },
                    ..
                }
            )
        });
        self.fixed = before - shader.instrs.len();
        shader.info.outputs_written &= !bit(VARYING_SLOT_EDGE);

        super::fold_constants::remove_dead_instrs(&mut shader);
        let reads_edgeflag = shader.intrinsics().any(|(op, _)| {
            matches!(
                op,
                Intrinsic::LoadInput {
                    location: VERT_ATTRIB_EDGEFLAG
                }
            )
        });
        if !reads_edgeflag {
            shader.info.inputs_read &= !bit(VERT_ATTRIB_EDGEFLAG);
        }
        Ok(shader)
    }
}
