// THEORY:
// The classifier takes fixed-size square inputs. `extract_region_crops` cuts every
// emitted region out of the frame and normalises it to `ideal x ideal`:
//
// - A crop larger than the ideal size on either axis is scaled down, preserving its
//   aspect ratio, until it fits.
// - A crop smaller than the ideal size is never upscaled; it is placed in the
//   top-left corner of a black canvas.
//
// Each crop remembers where it came from (region id, tile, frame index, source box
// and scale) so a classification result can be mapped back onto the frame.

use crate::core_modules::frame::Frame;
use crate::core_modules::geometry::Rect;
use crate::core_modules::region_consolidator::ConsolidatedRegion;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

#[derive(Debug, Clone)]
pub struct RegionCrop {
    pub region_id: u64,
    pub tile: Option<(u32, u32)>,
    pub frame_index: u64,
    /// The frame area the crop was taken from.
    pub source_box: Rect,
    /// Factor applied to the source pixels (1.0 when not downscaled).
    pub scale: f64,
    pub image: RgbImage,
}

impl RegionCrop {
    /// Maps a point in crop coordinates back onto the frame.
    pub fn to_frame_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.source_box.x as f64 + x / self.scale,
            self.source_box.y as f64 + y / self.scale,
        )
    }
}

pub fn extract_region_crops(
    frame: &Frame,
    regions: &[ConsolidatedRegion],
    ideal: u32,
) -> Vec<RegionCrop> {
    if regions.is_empty() || ideal == 0 {
        return Vec::new();
    }
    let rgb = frame.to_rgb();
    regions
        .iter()
        .filter_map(|region| {
            let source = region.bounding_box.clamp_to(frame.size());
            if source.is_empty() {
                return None;
            }
            let (w, h) = (source.width as u32, source.height as u32);
            let (x, y) = (source.x as u32, source.y as u32);
            let mut crop = imageops::crop_imm(&rgb, x, y, w, h).to_image();

            let longest = w.max(h);
            let scale = if longest > ideal {
                let scale = ideal as f64 / longest as f64;
                let nw = ((w as f64 * scale).round() as u32).clamp(1, ideal);
                let nh = ((h as f64 * scale).round() as u32).clamp(1, ideal);
                crop = imageops::resize(&crop, nw, nh, FilterType::Triangle);
                scale
            } else {
                1.0
            };

            let image = if crop.dimensions() == (ideal, ideal) {
                crop
            } else {
                let mut canvas = RgbImage::from_pixel(ideal, ideal, Rgb([0, 0, 0]));
                imageops::replace(&mut canvas, &crop, 0, 0);
                canvas
            };

            Some(RegionCrop {
                region_id: region.id,
                tile: region.tile,
                frame_index: frame.index,
                source_box: source,
                scale,
                image,
            })
        })
        .collect()
}
