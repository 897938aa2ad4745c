// THEORY:
// The `MaskCleaner` turns a speckled binary mask into solid, connected blobs. It is
// a pure function of the mask and its configuration, applied in a fixed order:
//
// 1.  **Close**: fills small holes inside moving objects.
// 2.  **Open**: removes isolated noise pixels and tiny specks.
// 3.  **Dilate**: grows what is left so that fragments of one object join up.
// 4.  **Erode**: optionally shrinks the result back toward its true outline.
//
// All four steps share one disk-shaped structuring element whose diameter is the
// configured kernel size.

use crate::config::MorphologyConfig;
use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, dilate, erode, open};
use tracing::{Span, trace};

pub struct MaskCleaner {
    config: MorphologyConfig,
    span: Span,
}

impl MaskCleaner {
    pub fn new(config: MorphologyConfig, span: Span) -> Self {
        Self { config, span }
    }

    fn radius(&self) -> u8 {
        (self.config.morph_kernel_size / 2).min(u8::MAX as u32) as u8
    }

    pub fn clean(&self, mask: &GrayImage) -> GrayImage {
        let radius = self.radius();
        if !self.config.enabled || radius == 0 {
            return mask.clone();
        }

        let mut cleaned = mask.clone();
        let mut applied: Vec<&'static str> = Vec::with_capacity(4);
        if self.config.morph_close {
            cleaned = close(&cleaned, Norm::L2, radius);
            applied.push("close");
        }
        if self.config.morph_open {
            cleaned = open(&cleaned, Norm::L2, radius);
            applied.push("open");
        }
        if self.config.dilation {
            cleaned = dilate(&cleaned, Norm::L2, radius);
            applied.push("dilate");
        }
        if self.config.erosion {
            cleaned = erode(&cleaned, Norm::L2, radius);
            applied.push("erode");
        }
        trace!(parent: &self.span, ops = ?applied, radius, "mask cleaned");
        cleaned
    }
}
