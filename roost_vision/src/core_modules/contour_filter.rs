// THEORY:
// The `ContourFilter` is the spatial grouping layer. It converts the cleaned mask
// into the frame's set of `MotionBox`es and decides which blobs are worth tracking.
//
// 1.  **Extraction**: Outer borders of the top-level connected components are
//     traced from the mask. Holes and blobs nested inside holes are ignored.
// 2.  **Measurement**: Each border is optionally simplified with Douglas-Peucker
//     (tolerance proportional to its perimeter) and wrapped in its convex hull.
//     From that come the three shape metrics the filter cares about:
//     - area:      enclosed polygon area of the traced border
//     - solidity:  area / convex hull area (1.0 = perfectly compact)
//     - aspect:    max(w, h) / min(w, h) of the bounding rectangle
// 3.  **Threshold Selection**: In permissive mode the configured cutoffs are used
//     as-is. In adaptive mode `AdaptiveThresholdState` periodically re-derives them
//     from the scene's own contour statistics.
// 4.  **Filtering**: A contour survives iff its area, solidity and aspect ratio all
//     pass. Degenerate shapes (zero area, empty hull) always fail; they are never
//     an error.

use crate::config::{ContourConfig, ContourDetectionMode};
use crate::core_modules::adaptive_thresholds::{
    AdaptiveThresholdState, ContourSample, FilterThresholds,
};
use crate::core_modules::geometry::Rect;
use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::geometry::{approximate_polygon_dp, arc_length, convex_hull};
use imageproc::point::Point;
use tracing::{Span, debug, trace};

/// An axis-aligned box around one surviving contour. It has no identity.
pub type MotionBox = Rect;

/// Shape measurements of one contour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourMetrics {
    pub area: f64,
    pub solidity: f64,
    pub aspect_ratio: f64,
    pub bounds: Rect,
}

impl ContourMetrics {
    fn sample(&self) -> ContourSample {
        ContourSample {
            area: self.area,
            solidity: self.solidity,
            aspect_ratio: self.aspect_ratio,
        }
    }
}

/// Per-frame counts of why contours were dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub total: usize,
    pub area_rejected: usize,
    pub solidity_rejected: usize,
    pub aspect_rejected: usize,
    pub accepted: usize,
}

#[derive(Debug, Clone)]
pub struct ContourReport {
    pub boxes: Vec<MotionBox>,
    pub stats: FilterStats,
    pub thresholds: FilterThresholds,
    /// Set on frames where adaptive thresholds were recomputed.
    pub recalculated: bool,
}

pub struct ContourFilter {
    config: ContourConfig,
    adaptive: AdaptiveThresholdState,
    span: Span,
}

impl ContourFilter {
    pub fn new(config: ContourConfig, span: Span) -> Self {
        let adaptive = AdaptiveThresholdState::new(&config);
        Self {
            config,
            adaptive,
            span,
        }
    }

    pub fn thresholds(&self) -> FilterThresholds {
        match self.config.contour_detection_mode {
            ContourDetectionMode::Adaptive => self.adaptive.thresholds,
            ContourDetectionMode::Permissive => FilterThresholds {
                min_area: self.config.min_contour_area,
                min_solidity: self.config.min_contour_solidity,
                max_aspect_ratio: self.config.max_contour_aspect_ratio,
            },
        }
    }

    pub fn extract(&mut self, mask: &GrayImage) -> ContourReport {
        // --- 1. Extraction ---
        let contours = external_contours(mask);

        // --- 2. Measurement ---
        let metrics: Vec<ContourMetrics> = contours
            .iter()
            .map(|points| measure_contour(points, &self.config))
            .collect();

        // --- 3. Threshold Selection ---
        let mut recalculated = false;
        if self.config.contour_detection_mode == ContourDetectionMode::Adaptive {
            let samples: Vec<ContourSample> = metrics.iter().map(ContourMetrics::sample).collect();
            recalculated = self.adaptive.observe(&samples);
            if recalculated {
                debug!(
                    parent: &self.span,
                    samples = samples.len(),
                    min_area = self.adaptive.thresholds.min_area,
                    min_solidity = self.adaptive.thresholds.min_solidity,
                    max_aspect_ratio = self.adaptive.thresholds.max_aspect_ratio,
                    "adaptive contour thresholds recalculated"
                );
            }
        }
        let thresholds = self.thresholds();

        // --- 4. Filtering ---
        let mut stats = FilterStats {
            total: metrics.len(),
            ..FilterStats::default()
        };
        let mut boxes = Vec::new();
        for m in &metrics {
            if m.area <= 0.0 || m.area < thresholds.min_area {
                stats.area_rejected += 1;
                continue;
            }
            if self.config.contour_filtering {
                if !(m.solidity >= thresholds.min_solidity) {
                    stats.solidity_rejected += 1;
                    continue;
                }
                if !(m.aspect_ratio <= thresholds.max_aspect_ratio) {
                    stats.aspect_rejected += 1;
                    continue;
                }
            }
            stats.accepted += 1;
            boxes.push(m.bounds);
        }

        trace!(
            parent: &self.span,
            total = stats.total,
            area_rejected = stats.area_rejected,
            solidity_rejected = stats.solidity_rejected,
            aspect_rejected = stats.aspect_rejected,
            accepted = stats.accepted,
            "contours filtered"
        );
        ContourReport {
            boxes,
            stats,
            thresholds,
            recalculated,
        }
    }
}

/// Outer borders of every top-level connected component in the mask.
pub fn external_contours(mask: &GrayImage) -> Vec<Vec<Point<i32>>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .filter(|points| !points.is_empty())
        .collect()
}

pub fn measure_contour(points: &[Point<i32>], config: &ContourConfig) -> ContourMetrics {
    let area = polygon_area(points);

    let approx = if config.contour_approximation && points.len() > 2 {
        let epsilon = config.contour_epsilon_factor * arc_length(points, true);
        approximate_polygon_dp(points, epsilon, true)
    } else {
        points.to_vec()
    };

    let (solidity, bounds) = if config.convex_hull {
        let hull = if approx.len() > 2 {
            convex_hull(approx.as_slice())
        } else {
            approx.clone()
        };
        let hull_area = polygon_area(&hull);
        let solidity = if hull_area > 0.0 { area / hull_area } else { 0.0 };
        (solidity, bounding_rect(&hull))
    } else {
        (1.0, bounding_rect(&approx))
    };

    let long = bounds.width.max(bounds.height) as f64;
    let short = bounds.width.min(bounds.height) as f64;
    let aspect_ratio = if short > 0.0 { long / short } else { f64::INFINITY };

    ContourMetrics {
        area,
        solidity,
        aspect_ratio,
        bounds,
    }
}

/// Area enclosed by a closed polygon (shoelace formula).
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

/// Smallest pixel rectangle containing every point.
pub fn bounding_rect(points: &[Point<i32>]) -> Rect {
    let Some(first) = points.first() else {
        return Rect::default();
    };
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Rect::from_edges(x0, y0, x1 + 1, y1 + 1)
}
