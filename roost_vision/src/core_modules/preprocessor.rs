// THEORY:
// The `FramePreprocessor` is the first layer of the engine. It turns whatever the
// camera delivered into one or more 8-bit planes that are fit for differencing.
//
// 1.  **Colour Space**: In grayscale mode the frame collapses to a single luma
//     plane. In rgb mode the three colour planes are kept separately so that a
//     chroma-only change (a red bird on green leaves) still produces a difference.
// 2.  **Contrast Enhancement**: Optional CLAHE (contrast-limited adaptive histogram
//     equalisation) evens out shadows and backlight so that the same motion gives a
//     similar difference everywhere in the scene.
// 3.  **Blur**: Sensor noise and compression artefacts are suppressed with a
//     gaussian, median or edge-preserving bilateral filter before differencing.
//
// The preprocessor is stateless: the same frame always yields the same planes.

use crate::config::{BlurType, PreprocessConfig, ProcessingMode};
use crate::core_modules::frame::Frame;
use crate::error::{ConfigError, FrameError};
use image::{GrayImage, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use tracing::{Span, trace};

pub struct FramePreprocessor {
    config: PreprocessConfig,
    span: Span,
}

impl FramePreprocessor {
    pub fn new(config: PreprocessConfig, span: Span) -> Result<Self, ConfigError> {
        if matches!(config.blur_type, BlurType::Gaussian | BlurType::Median)
            && config.kernel_size % 2 == 0
        {
            return Err(ConfigError::invalid(
                "preprocess.kernel_size",
                format!("kernel size {} must be odd", config.kernel_size),
            ));
        }
        Ok(Self { config, span })
    }

    /// Produces the planes the motion detector compares. All planes share the
    /// frame's dimensions.
    pub fn process(&self, frame: &Frame) -> Result<Vec<GrayImage>, FrameError> {
        frame.validate()?;

        // --- 1. Colour Space ---
        let mut planes = match self.config.processing_mode {
            ProcessingMode::Grayscale => vec![frame.to_luma()],
            ProcessingMode::Rgb => frame.color_planes(),
        };

        // --- 2. Contrast Enhancement ---
        if self.config.contrast_enhancement {
            let tiles = self.config.clahe_tile_size;
            let clip = self.config.clahe_clip_limit;
            planes = planes.iter().map(|p| clahe(p, clip, tiles)).collect();
        }

        // --- 3. Blur ---
        planes = planes.iter().map(|p| self.blur(p)).collect();

        trace!(
            parent: &self.span,
            frame = frame.index,
            planes = planes.len(),
            blur = ?self.config.blur_type,
            "frame preprocessed"
        );
        Ok(planes)
    }

    fn blur(&self, plane: &GrayImage) -> GrayImage {
        let k = self.config.kernel_size;
        match self.config.blur_type {
            BlurType::None => plane.clone(),
            BlurType::Gaussian if k > 1 => gaussian_blur_f32(plane, sigma_for_kernel(k)),
            BlurType::Median if k > 1 => median_filter(plane, k / 2, k / 2),
            BlurType::Gaussian | BlurType::Median => plane.clone(),
            BlurType::Bilateral => bilateral_filter(
                plane,
                self.config.bilateral_d,
                self.config.bilateral_sigma_color,
                self.config.bilateral_sigma_space,
            ),
        }
    }
}

/// The standard deviation conventionally paired with an odd gaussian kernel size.
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Edge-preserving smoothing over a circular window of diameter `diameter`.
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f64,
    sigma_space: f64,
) -> GrayImage {
    let radius = (diameter / 2) as i32;
    if radius == 0 {
        return image.clone();
    }
    let (w, h) = (image.width() as i32, image.height() as i32);

    let color_weights: Vec<f64> = (0..256)
        .map(|d| (-((d * d) as f64) / (2.0 * sigma_color * sigma_color)).exp())
        .collect();
    let mut window: Vec<(i32, i32, f64)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f64;
            if r2 <= (radius * radius) as f64 {
                window.push((dx, dy, (-r2 / (2.0 * sigma_space * sigma_space)).exp()));
            }
        }
    }

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let center = image.get_pixel(x, y)[0] as i32;
        let mut sum = 0.0;
        let mut norm = 0.0;
        for &(dx, dy, ws) in &window {
            let sx = (x as i32 + dx).clamp(0, w - 1) as u32;
            let sy = (y as i32 + dy).clamp(0, h - 1) as u32;
            let v = image.get_pixel(sx, sy)[0] as i32;
            let weight = ws * color_weights[(v - center).unsigned_abs() as usize];
            sum += weight * v as f64;
            norm += weight;
        }
        Luma([(sum / norm).round().clamp(0.0, 255.0) as u8])
    })
}

/// Contrast-limited adaptive histogram equalisation over a `grid` x `grid` tiling.
pub fn clahe(image: &GrayImage, clip_limit: f64, grid: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let tiles_x = grid.clamp(1, w.max(1));
    let tiles_y = grid.clamp(1, h.max(1));

    // --- 1. Per-tile lookup tables ---
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, x1) = (tx * w / tiles_x, (tx + 1) * w / tiles_x);
            let (y0, y1) = (ty * h / tiles_y, (ty + 1) * h / tiles_y);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let pixels = ((x1 - x0) * (y1 - y0)).max(1);
            clip_histogram(&mut hist, clip_limit, pixels);
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (level, count) in hist.iter().enumerate() {
                cdf += count;
                lut[level] = ((cdf as f64 * 255.0 / pixels as f64).round()).min(255.0) as u8;
            }
        }
    }

    // --- 2. Bilinear blend between neighbouring tiles ---
    let tile_w = w as f64 / tiles_x as f64;
    let tile_h = h as f64 / tiles_y as f64;
    GrayImage::from_fn(w, h, |x, y| {
        let v = image.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, ax) = tile_neighbours((x as f64 + 0.5) / tile_w - 0.5, tiles_x);
        let (ty0, ty1, ay) = tile_neighbours((y as f64 + 0.5) / tile_h - 0.5, tiles_y);
        let at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f64;
        let top = at(tx0, ty0) * (1.0 - ax) + at(tx1, ty0) * ax;
        let bottom = at(tx0, ty1) * (1.0 - ax) + at(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round() as u8])
    })
}

fn clip_histogram(hist: &mut [u32; 256], clip_limit: f64, pixels: u32) {
    let limit = ((clip_limit * pixels as f64 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (level, count) in hist.iter_mut().enumerate() {
        *count += share + u32::from(level < remainder);
    }
}

fn tile_neighbours(position: f64, tiles: u32) -> (u32, u32, f64) {
    if position <= 0.0 {
        return (0, 0, 0.0);
    }
    let lower = position.floor();
    let t0 = (lower as u32).min(tiles - 1);
    let t1 = (t0 + 1).min(tiles - 1);
    (t0, t1, position - lower)
}
