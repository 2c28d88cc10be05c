//! Whole-frame super-resolution (Real-ESRGAN / Real-HATGAN).

use crate::errors::{Result, VisageError};
use crate::inference::{SessionHandle, SessionKey, SessionRegistry};
use crate::pipeline::FrameData;
use crate::vision::tile::{self, Tile, TileLayout};
use crate::vision::tensor;

use super::{blend_frames, FrameProcessor, ProcessorContext};

/// Upscales the whole frame by the model's scale factor, tiling the input
/// to fit the model and feathering tile seams on the way back together.
pub struct FrameEnhancer {
    session: SessionHandle,
    scale: u32,
    layout: TileLayout,
    blend: f32,
}

impl FrameEnhancer {
    pub fn new(ctx: &ProcessorContext, model: &str, blend: f32) -> Result<Self> {
        let session = SessionRegistry::global().get_session(&SessionKey::new(
            ctx.repo.resolve(model)?,
            ctx.session.clone(),
        ))?;
        Ok(Self {
            session,
            scale: model_scale(model)?,
            layout: TileLayout::default(),
            blend,
        })
    }

    fn enhance_tile(&self, tile: &Tile) -> Result<Tile> {
        let input_name = self
            .session
            .input_names()
            .first()
            .map_or("input", String::as_str);
        let outputs = self.session.run(vec![(
            input_name,
            tensor::chw_input(&tile.frame, [0.0; 3], [1.0; 3]).into_dyn(),
        )])?;

        let out = &outputs[0];
        let (h, w) = match out.shape.as_slice() {
            [_, _, h, w] => (*h as usize, *w as usize),
            _ => {
                let edge = (tile.frame.width() * self.scale) as usize;
                (edge, edge)
            }
        };
        Ok(Tile {
            frame: tensor::frame_from_chw_unit(&out.data, h, w),
            x: tile.x,
            y: tile.y,
        })
    }
}

impl FrameProcessor for FrameEnhancer {
    fn name(&self) -> &str {
        "frame_enhancer"
    }

    fn process(&self, frame: &mut FrameData) -> Result<()> {
        let (src_w, src_h) = (frame.image.width(), frame.image.height());

        let tiles = tile::split(&frame.image, self.layout);
        let mut enhanced_tiles = Vec::with_capacity(tiles.len());
        for tile in &tiles {
            enhanced_tiles.push(self.enhance_tile(tile)?);
        }
        let enhanced = tile::stitch(&enhanced_tiles, src_w, src_h, self.scale);

        // blend against the plainly upscaled original so a low factor keeps
        // the source texture
        let upscaled = frame.image.resize(src_w * self.scale, src_h * self.scale);
        frame.image = blend_frames(&upscaled, &enhanced, self.blend);
        Ok(())
    }
}

/// Scale factor encoded in the logical model name (`…_x2`, `…_x4`, `…_x8`).
fn model_scale(model: &str) -> Result<u32> {
    for (suffix, scale) in [("x2", 2u32), ("x4", 4), ("x8", 8)] {
        if model.contains(&format!("_{suffix}")) {
            return Ok(scale);
        }
    }
    Err(VisageError::ParameterOutOfRange {
        field: "pipeline.params.model".into(),
        value: model.to_string(),
    })
}
