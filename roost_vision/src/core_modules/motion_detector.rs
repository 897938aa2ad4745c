// THEORY:
// The `MotionDetector` is the temporal layer. It is the only stage besides the
// tracker and consolidator that remembers anything between frames: the previous
// preprocessed planes and, optionally, a learned `BackgroundModel`.
//
// For each frame:
// 1.  **Differencing**: `|current - previous|` per plane, collapsed to one plane by
//     taking the per-pixel maximum, so a change on any channel counts.
// 2.  **Thresholding**: The difference is binarised, either at a fixed level or at
//     the level Otsu's method picks from the difference histogram.
// 3.  **Background Subtraction**: When enabled, pixels that deviate from the learned
//     background are OR-ed into the mask.
// 4.  **Memory**: The current planes replace the stored previous planes.
//
// The first frame of a session has nothing to compare against. It yields an empty
// mask and seeds the background model.

use crate::config::{DetectionConfig, ThresholdMode};
use crate::core_modules::background_model::BackgroundModel;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use tracing::{Span, debug, trace};

/// The difference image and the binary mask derived from it.
#[derive(Debug, Clone)]
pub struct MotionMask {
    pub difference: GrayImage,
    pub mask: GrayImage,
    /// The binarisation level used for this frame.
    pub level: u8,
}

impl MotionMask {
    fn empty(width: u32, height: u32) -> Self {
        Self {
            difference: GrayImage::new(width, height),
            mask: GrayImage::new(width, height),
            level: 0,
        }
    }

    pub fn motion_pixels(&self) -> usize {
        self.mask.pixels().filter(|p| p[0] > 0).count()
    }
}

pub struct MotionDetector {
    config: DetectionConfig,
    previous: Option<Vec<GrayImage>>,
    background: Option<BackgroundModel>,
    span: Span,
}

impl MotionDetector {
    pub fn new(config: DetectionConfig, span: Span) -> Self {
        Self {
            config,
            previous: None,
            background: None,
            span,
        }
    }

    /// Whether a previous frame is held.
    pub fn is_primed(&self) -> bool {
        self.previous.is_some()
    }

    /// Forgets the previous frame and the background model.
    pub fn reset(&mut self) {
        self.previous = None;
        self.background = None;
    }

    pub fn detect(&mut self, planes: Vec<GrayImage>) -> MotionMask {
        let (width, height) = planes.first().map_or((0, 0), |p| p.dimensions());

        let Some(previous) = self.previous.as_ref() else {
            if self.config.background_subtraction {
                self.background = Some(BackgroundModel::seed(
                    &planes,
                    self.config.background_learning_rate,
                    self.config.background_variance_threshold,
                ));
            }
            debug!(parent: &self.span, width, height, "first frame stored, no motion yet");
            self.previous = Some(planes);
            return MotionMask::empty(width, height);
        };

        // --- 1. Differencing ---
        let difference = max_absdiff(&planes, previous);

        // --- 2. Thresholding ---
        let level = match self.config.threshold_mode {
            ThresholdMode::Otsu => otsu_level(&difference),
            ThresholdMode::Fixed => self.config.diff_threshold,
        };
        let on = self.config.max_threshold;
        let mut mask = GrayImage::from_fn(width, height, |x, y| {
            Luma([if difference.get_pixel(x, y)[0] > level { on } else { 0 }])
        });

        // --- 3. Background Subtraction ---
        if let Some(model) = self.background.as_mut() {
            let foreground = model.apply(&planes, on);
            for (m, f) in mask.pixels_mut().zip(foreground.pixels()) {
                m[0] = m[0].max(f[0]);
            }
        }

        // --- 4. Memory ---
        self.previous = Some(planes);

        let result = MotionMask {
            difference,
            mask,
            level,
        };
        trace!(
            parent: &self.span,
            level,
            motion_pixels = result.motion_pixels(),
            "motion mask computed"
        );
        result
    }
}

/// Per-pixel maximum over planes of the absolute difference.
pub fn max_absdiff(current: &[GrayImage], previous: &[GrayImage]) -> GrayImage {
    let (width, height) = current.first().map_or((0, 0), |p| p.dimensions());
    let mut out = GrayImage::new(width, height);
    for (cur, prev) in current.iter().zip(previous) {
        for ((o, c), p) in out.pixels_mut().zip(cur.pixels()).zip(prev.pixels()) {
            o[0] = o[0].max(c[0].abs_diff(p[0]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_config() -> DetectionConfig {
        DetectionConfig {
            threshold_mode: ThresholdMode::Fixed,
            diff_threshold: 25,
            ..DetectionConfig::default()
        }
    }

    #[test]
    fn first_frame_gives_empty_mask() {
        let mut detector = MotionDetector::new(fixed_config(), Span::none());
        let out = detector.detect(vec![GrayImage::from_pixel(10, 10, Luma([200]))]);
        assert_eq!(out.motion_pixels(), 0);
        assert!(detector.is_primed());
    }

    #[test]
    fn changed_square_is_detected() {
        let mut detector = MotionDetector::new(fixed_config(), Span::none());
        let background = GrayImage::from_pixel(20, 20, Luma([10]));
        detector.detect(vec![background.clone()]);
        let mut moved = background.clone();
        for y in 5..10 {
            for x in 5..10 {
                moved.put_pixel(x, y, Luma([200]));
            }
        }
        let out = detector.detect(vec![moved]);
        assert_eq!(out.motion_pixels(), 25);
        assert_eq!(out.mask.get_pixel(7, 7)[0], 255);
    }

    #[test]
    fn small_changes_stay_below_fixed_threshold() {
        let mut detector = MotionDetector::new(fixed_config(), Span::none());
        detector.detect(vec![GrayImage::from_pixel(6, 6, Luma([100]))]);
        let out = detector.detect(vec![GrayImage::from_pixel(6, 6, Luma([110]))]);
        assert_eq!(out.motion_pixels(), 0);
    }

    #[test]
    fn otsu_separates_bimodal_difference() {
        let mut detector = MotionDetector::new(DetectionConfig::default(), Span::none());
        detector.detect(vec![GrayImage::from_pixel(10, 10, Luma([0]))]);
        let moved = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 3 { 180 } else { 2 }]));
        let out = detector.detect(vec![moved]);
        assert_eq!(out.motion_pixels(), 30);
    }

    #[test]
    fn any_plane_can_carry_motion() {
        let a = GrayImage::from_pixel(4, 4, Luma([50]));
        let mut b = a.clone();
        b.put_pixel(1, 1, Luma([150]));
        let diff = max_absdiff(&[a.clone(), b], &[a.clone(), a]);
        assert_eq!(diff.get_pixel(1, 1)[0], 100);
        assert_eq!(diff.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn background_model_catches_stopped_object() {
        let config = DetectionConfig {
            background_subtraction: true,
            ..fixed_config()
        };
        let mut detector = MotionDetector::new(config, Span::none());
        let empty = GrayImage::from_pixel(8, 8, Luma([20]));
        let mut occupied = empty.clone();
        occupied.put_pixel(4, 4, Luma([220]));
        detector.detect(vec![empty]);
        detector.detect(vec![occupied.clone()]);
        // No frame-to-frame change, but the pixel still differs from the background.
        let out = detector.detect(vec![occupied]);
        assert_eq!(out.mask.get_pixel(4, 4)[0], 255);
    }
}
