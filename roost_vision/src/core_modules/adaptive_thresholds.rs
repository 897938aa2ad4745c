// THEORY:
// Fixed contour thresholds never survive contact with a new camera: a gravel path
// produces hundreds of tiny specks, a hedge in the wind produces long thin slivers.
// `AdaptiveThresholdState` lets the contour filter tune itself to the scene.
//
// Every `recalc_interval` frames the distribution of the current frame's raw
// contours is sampled and the filter cutoffs are moved to fixed percentiles:
//
// - minimum area:      10th percentile of all non-zero contour areas
// - minimum solidity:  25th percentile of solidity
// - max aspect ratio:  90th percentile of aspect ratio
//
// Solidity and aspect ratio are sampled only from contours of at least
// `STATS_MIN_AREA` px², since speck-sized contours have meaningless shape.
// Each value is clamped into its safety bounds. Between recalculations (and when
// a recalculation finds no samples) the previous value stays in effect.
//
// Percentiles use the lower nearest-rank rule: with `n` sorted samples the p-th
// percentile is `sorted[floor(p * n)]`, clamped to the last index. Ties and
// ordering of equal values cannot change the result.

use crate::config::{Bounds, ContourConfig};

/// Contours smaller than this do not contribute shape statistics.
pub const STATS_MIN_AREA: f64 = 100.0;

const AREA_PERCENTILE: f64 = 0.10;
const SOLIDITY_PERCENTILE: f64 = 0.25;
const ASPECT_PERCENTILE: f64 = 0.90;

/// The shape measurements one contour contributes to the statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourSample {
    pub area: f64,
    pub solidity: f64,
    pub aspect_ratio: f64,
}

/// The filter cutoffs currently in effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThresholds {
    pub min_area: f64,
    pub min_solidity: f64,
    pub max_aspect_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct AdaptiveThresholdState {
    pub thresholds: FilterThresholds,
    /// Frames seen since the last recalculation.
    pub frames_since_recalc: u32,
    recalc_interval: u32,
    area_bounds: Bounds,
    solidity_bounds: Bounds,
    aspect_bounds: Bounds,
}

impl AdaptiveThresholdState {
    /// Starts from the permissive thresholds in `config`.
    pub fn new(config: &ContourConfig) -> Self {
        Self {
            thresholds: FilterThresholds {
                min_area: config.min_contour_area,
                min_solidity: config.min_contour_solidity,
                max_aspect_ratio: config.max_contour_aspect_ratio,
            },
            frames_since_recalc: 0,
            recalc_interval: config.recalc_interval.max(1),
            area_bounds: config.adaptive_area_bounds,
            solidity_bounds: config.adaptive_solidity_bounds,
            aspect_bounds: config.adaptive_aspect_bounds,
        }
    }

    /// Counts one frame and, when the interval has elapsed, recomputes the
    /// thresholds from `samples`. Returns whether a recalculation happened.
    pub fn observe(&mut self, samples: &[ContourSample]) -> bool {
        self.frames_since_recalc += 1;
        if self.frames_since_recalc < self.recalc_interval {
            return false;
        }
        self.frames_since_recalc = 0;
        self.recalculate(samples);
        true
    }

    pub fn recalculate(&mut self, samples: &[ContourSample]) {
        let areas: Vec<f64> = samples.iter().map(|s| s.area).filter(|&a| a > 0.0).collect();
        let shaped: Vec<&ContourSample> =
            samples.iter().filter(|s| s.area >= STATS_MIN_AREA).collect();
        let solidities: Vec<f64> = shaped.iter().map(|s| s.solidity).collect();
        let aspects: Vec<f64> = shaped.iter().map(|s| s.aspect_ratio).collect();

        if let Some(v) = nearest_rank_percentile(areas, AREA_PERCENTILE) {
            self.thresholds.min_area = self.area_bounds.clamp(v);
        }
        if let Some(v) = nearest_rank_percentile(solidities, SOLIDITY_PERCENTILE) {
            self.thresholds.min_solidity = self.solidity_bounds.clamp(v);
        }
        if let Some(v) = nearest_rank_percentile(aspects, ASPECT_PERCENTILE) {
            self.thresholds.max_aspect_ratio = self.aspect_bounds.clamp(v);
        }
    }
}

/// Lower nearest-rank percentile. Non-finite samples are ignored.
pub fn nearest_rank_percentile(mut values: Vec<f64>, p: f64) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let rank = ((p * values.len() as f64).floor() as usize).min(values.len() - 1);
    Some(values[rank])
}
