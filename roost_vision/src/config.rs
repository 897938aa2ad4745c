// THEORY:
// Every tunable number in the engine lives here, grouped by the stage that reads it.
// Each section can be omitted from a configuration file entirely and every field
// has a default, so an empty file (or no file at all) yields a working pipeline.
//
// Configuration is layered: an optional file (TOML, YAML or JSON, picked from the
// extension) is read first, then `ROOST__SECTION__KEY` environment variables
// override it. Keys the engine does not know are ignored.
//
// `PipelineConfig::normalized` is the single gate between raw configuration and a
// running pipeline. Adaptive threshold bounds are clamped into hard limits; every
// other out-of-range value is rejected with a `ConfigError`.

use crate::core_modules::geometry::OverlapMetric;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const ENV_PREFIX: &str = "ROOST";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub morphology: MorphologyConfig,
    #[serde(default)]
    pub contours: ContourConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

// --- Preprocessing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Grayscale,
    Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurType {
    Gaussian,
    Median,
    Bilateral,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_processing_mode")]
    pub processing_mode: ProcessingMode,
    /// Applies CLAHE to each plane before blurring.
    #[serde(default)]
    pub contrast_enhancement: bool,
    #[serde(default = "default_clahe_clip_limit")]
    pub clahe_clip_limit: f64,
    /// Number of tiles along each axis of the CLAHE grid.
    #[serde(default = "default_clahe_tile_size")]
    pub clahe_tile_size: u32,
    #[serde(default = "default_blur_type")]
    pub blur_type: BlurType,
    /// Odd kernel size shared by the gaussian and median blurs.
    #[serde(default = "default_kernel_size")]
    pub kernel_size: u32,
    /// Pixel neighbourhood diameter of the bilateral filter.
    #[serde(default = "default_bilateral_d")]
    pub bilateral_d: u32,
    #[serde(default = "default_bilateral_sigma")]
    pub bilateral_sigma_color: f64,
    #[serde(default = "default_bilateral_sigma")]
    pub bilateral_sigma_space: f64,
}

fn default_processing_mode() -> ProcessingMode {
    ProcessingMode::Grayscale
}
fn default_clahe_clip_limit() -> f64 {
    2.0
}
fn default_clahe_tile_size() -> u32 {
    8
}
fn default_blur_type() -> BlurType {
    BlurType::Gaussian
}
fn default_kernel_size() -> u32 {
    5
}
fn default_bilateral_d() -> u32 {
    15
}
fn default_bilateral_sigma() -> f64 {
    75.0
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            processing_mode: default_processing_mode(),
            contrast_enhancement: false,
            clahe_clip_limit: default_clahe_clip_limit(),
            clahe_tile_size: default_clahe_tile_size(),
            blur_type: default_blur_type(),
            kernel_size: default_kernel_size(),
            bilateral_d: default_bilateral_d(),
            bilateral_sigma_color: default_bilateral_sigma(),
            bilateral_sigma_space: default_bilateral_sigma(),
        }
    }
}

// --- Detection ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Level chosen per frame from the difference histogram.
    Otsu,
    /// Level taken from `diff_threshold`.
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_threshold_mode")]
    pub threshold_mode: ThresholdMode,
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: u8,
    /// Value written into the mask for moving pixels.
    #[serde(default = "default_max_threshold")]
    pub max_threshold: u8,
    #[serde(default)]
    pub background_subtraction: bool,
    /// Per-frame weight of the newest sample in the background mean/variance.
    #[serde(default = "default_background_learning_rate")]
    pub background_learning_rate: f64,
    /// Squared Mahalanobis distance above which a pixel is foreground.
    #[serde(default = "default_background_variance_threshold")]
    pub background_variance_threshold: f64,
}

fn default_threshold_mode() -> ThresholdMode {
    ThresholdMode::Otsu
}
fn default_diff_threshold() -> u8 {
    25
}
fn default_max_threshold() -> u8 {
    255
}
fn default_background_learning_rate() -> f64 {
    1.0 / 500.0
}
fn default_background_variance_threshold() -> f64 {
    16.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_mode: default_threshold_mode(),
            diff_threshold: default_diff_threshold(),
            max_threshold: default_max_threshold(),
            background_subtraction: false,
            background_learning_rate: default_background_learning_rate(),
            background_variance_threshold: default_background_variance_threshold(),
        }
    }
}

// --- Morphology ---

#[derive(Debug, Clone, Deserialize)]
pub struct MorphologyConfig {
    /// Master switch for the whole cleaning pass.
    #[serde(default = "default_true", alias = "morphology")]
    pub enabled: bool,
    #[serde(default = "default_kernel_size")]
    pub morph_kernel_size: u32,
    #[serde(default = "default_true")]
    pub morph_close: bool,
    #[serde(default = "default_true")]
    pub morph_open: bool,
    #[serde(default = "default_true")]
    pub dilation: bool,
    #[serde(default)]
    pub erosion: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MorphologyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            morph_kernel_size: default_kernel_size(),
            morph_close: true,
            morph_open: true,
            dilation: true,
            erosion: false,
        }
    }
}

// --- Contours ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContourDetectionMode {
    Adaptive,
    Permissive,
}

/// An inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    fn clamp_into(&self, hard: Bounds) -> Bounds {
        Bounds::new(hard.clamp(self.min), hard.clamp(self.max))
    }
}

pub const AREA_HARD_LIMITS: Bounds = Bounds::new(1.0, 1_000_000.0);
pub const SOLIDITY_HARD_LIMITS: Bounds = Bounds::new(0.0, 1.0);
pub const ASPECT_HARD_LIMITS: Bounds = Bounds::new(1.0, 1000.0);

#[derive(Debug, Clone, Deserialize)]
pub struct ContourConfig {
    #[serde(default = "default_contour_detection_mode")]
    pub contour_detection_mode: ContourDetectionMode,
    #[serde(default = "default_true")]
    pub convex_hull: bool,
    #[serde(default = "default_true")]
    pub contour_approximation: bool,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    #[serde(default = "default_contour_epsilon_factor")]
    pub contour_epsilon_factor: f64,
    /// When off, only the area test is applied.
    #[serde(default = "default_true")]
    pub contour_filtering: bool,
    #[serde(default = "default_min_contour_area")]
    pub min_contour_area: f64,
    #[serde(default = "default_min_contour_solidity")]
    pub min_contour_solidity: f64,
    #[serde(default = "default_max_contour_aspect_ratio")]
    pub max_contour_aspect_ratio: f64,
    /// Frames between adaptive threshold recalculations.
    #[serde(default = "default_recalc_interval")]
    pub recalc_interval: u32,
    #[serde(default = "default_adaptive_area_bounds")]
    pub adaptive_area_bounds: Bounds,
    #[serde(default = "default_adaptive_solidity_bounds")]
    pub adaptive_solidity_bounds: Bounds,
    #[serde(default = "default_adaptive_aspect_bounds")]
    pub adaptive_aspect_bounds: Bounds,
}

fn default_contour_detection_mode() -> ContourDetectionMode {
    ContourDetectionMode::Adaptive
}
fn default_contour_epsilon_factor() -> f64 {
    0.03
}
fn default_min_contour_area() -> f64 {
    50.0
}
fn default_min_contour_solidity() -> f64 {
    0.1
}
fn default_max_contour_aspect_ratio() -> f64 {
    10.0
}
fn default_recalc_interval() -> u32 {
    150
}
fn default_adaptive_area_bounds() -> Bounds {
    Bounds::new(50.0, 1000.0)
}
fn default_adaptive_solidity_bounds() -> Bounds {
    Bounds::new(0.2, 0.8)
}
fn default_adaptive_aspect_bounds() -> Bounds {
    Bounds::new(2.0, 15.0)
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            contour_detection_mode: default_contour_detection_mode(),
            convex_hull: true,
            contour_approximation: true,
            contour_epsilon_factor: default_contour_epsilon_factor(),
            contour_filtering: true,
            min_contour_area: default_min_contour_area(),
            min_contour_solidity: default_min_contour_solidity(),
            max_contour_aspect_ratio: default_max_contour_aspect_ratio(),
            recalc_interval: default_recalc_interval(),
            adaptive_area_bounds: default_adaptive_area_bounds(),
            adaptive_solidity_bounds: default_adaptive_solidity_bounds(),
            adaptive_aspect_bounds: default_adaptive_aspect_bounds(),
        }
    }
}

// --- Tracking ---

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Max centroid distance (px) between a box and the object it continues.
    #[serde(default = "default_max_tracking_distance")]
    pub max_tracking_distance: f64,
    #[serde(default = "default_tracking_overlap_metric")]
    pub tracking_overlap_metric: OverlapMetric,
    /// A pair also matches when its overlap reaches this value.
    #[serde(default = "default_overlap_threshold")]
    pub tracking_overlap_threshold: f64,
    /// Misses tolerated before an object is removed.
    #[serde(default = "default_max_misses")]
    pub max_misses: u32,
    #[serde(default = "default_velocity_window")]
    pub velocity_window: usize,
    #[serde(default = "default_max_trajectory_points")]
    pub max_trajectory_points: usize,
    #[serde(default)]
    pub spatial_merging: bool,
    #[serde(default = "default_spatial_merge_distance")]
    pub spatial_merge_distance: f64,
    #[serde(default = "default_overlap_threshold")]
    pub spatial_merge_overlap: f64,
    /// Fuse nearby boxes that move in the same direction before matching.
    #[serde(default)]
    pub motion_clustering: bool,
    /// Cosine similarity two motion vectors need to be fused.
    #[serde(default = "default_motion_similarity_threshold")]
    pub motion_similarity_threshold: f64,
    /// Frames of box history a motion vector is measured over.
    #[serde(default = "default_motion_history_frames")]
    pub motion_history_frames: usize,
    /// Weight of the previous smoothed center; 0 disables smoothing.
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f64,
}

fn default_max_tracking_distance() -> f64 {
    100.0
}
fn default_tracking_overlap_metric() -> OverlapMetric {
    OverlapMetric::Iou
}
fn default_overlap_threshold() -> f64 {
    0.3
}
fn default_max_misses() -> u32 {
    5
}
fn default_velocity_window() -> usize {
    5
}
fn default_max_trajectory_points() -> usize {
    30
}
fn default_spatial_merge_distance() -> f64 {
    50.0
}
fn default_motion_similarity_threshold() -> f64 {
    0.7
}
fn default_motion_history_frames() -> usize {
    5
}
fn default_smoothing_factor() -> f64 {
    0.6
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_tracking_distance: default_max_tracking_distance(),
            tracking_overlap_metric: default_tracking_overlap_metric(),
            tracking_overlap_threshold: default_overlap_threshold(),
            max_misses: default_max_misses(),
            velocity_window: default_velocity_window(),
            max_trajectory_points: default_max_trajectory_points(),
            spatial_merging: false,
            spatial_merge_distance: default_spatial_merge_distance(),
            spatial_merge_overlap: default_overlap_threshold(),
            motion_clustering: false,
            motion_similarity_threshold: default_motion_similarity_threshold(),
            motion_history_frames: default_motion_history_frames(),
            smoothing_factor: default_smoothing_factor(),
        }
    }
}

// --- Consolidation ---

#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(
        default = "default_max_distance_threshold",
        alias = "maxDistanceThreshold",
        alias = "maxdistancethreshold"
    )]
    pub max_distance_threshold: f64,
    #[serde(
        default = "default_min_objects_per_region",
        alias = "minObjectsPerRegion",
        alias = "minobjectsperregion"
    )]
    pub min_objects_per_region: usize,
    #[serde(
        default = "default_region_expansion_factor",
        alias = "regionExpansionFactor",
        alias = "regionexpansionfactor"
    )]
    pub region_expansion_factor: f64,
    #[serde(
        default = "default_ideal_model_region_size",
        alias = "idealModelRegionSize",
        alias = "idealmodelregionsize"
    )]
    pub ideal_model_region_size: u32,
    #[serde(
        default = "default_size_tolerance_percent",
        alias = "sizeTolerancePercent",
        alias = "sizetolerancepercent"
    )]
    pub size_tolerance_percent: u32,
    #[serde(
        default = "default_max_frames_without_update",
        alias = "maxFramesWithoutUpdate",
        alias = "maxframeswithoutupdate"
    )]
    pub max_frames_without_update: u32,
    /// Merging and overlap resolution threshold (intersection / smaller area).
    #[serde(
        default = "default_overlap_threshold",
        alias = "overlapThreshold",
        alias = "overlapthreshold"
    )]
    pub overlap_threshold: f64,
    #[serde(default = "default_region_match_metric")]
    pub region_match_metric: OverlapMetric,
    /// Overlap a new group box needs with an existing region to refresh it.
    #[serde(default = "default_region_match_threshold")]
    pub region_match_threshold: f64,
    /// Tiles regions larger than the tolerated size.
    #[serde(default = "default_true")]
    pub split_oversized_regions: bool,
}

fn default_max_distance_threshold() -> f64 {
    100.0
}
fn default_min_objects_per_region() -> usize {
    2
}
fn default_region_expansion_factor() -> f64 {
    1.2
}
fn default_ideal_model_region_size() -> u32 {
    640
}
fn default_size_tolerance_percent() -> u32 {
    30
}
fn default_max_frames_without_update() -> u32 {
    10
}
fn default_region_match_metric() -> OverlapMetric {
    OverlapMetric::Smaller
}
fn default_region_match_threshold() -> f64 {
    0.5
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            max_distance_threshold: default_max_distance_threshold(),
            min_objects_per_region: default_min_objects_per_region(),
            region_expansion_factor: default_region_expansion_factor(),
            ideal_model_region_size: default_ideal_model_region_size(),
            size_tolerance_percent: default_size_tolerance_percent(),
            max_frames_without_update: default_max_frames_without_update(),
            overlap_threshold: default_overlap_threshold(),
            region_match_metric: default_region_match_metric(),
            region_match_threshold: default_region_match_threshold(),
            split_oversized_regions: true,
        }
    }
}

// --- Debug ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Keep the intermediate planes and masks in every frame report.
    #[serde(default)]
    pub keep_stages: bool,
}

impl PipelineConfig {
    /// Clamps adaptive bounds into their hard limits and validates everything else.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        let contours = &mut self.contours;
        contours.adaptive_area_bounds = contours.adaptive_area_bounds.clamp_into(AREA_HARD_LIMITS);
        contours.adaptive_solidity_bounds =
            contours.adaptive_solidity_bounds.clamp_into(SOLIDITY_HARD_LIMITS);
        contours.adaptive_aspect_bounds =
            contours.adaptive_aspect_bounds.clamp_into(ASPECT_HARD_LIMITS);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.preprocess;
        if p.blur_type != BlurType::Bilateral && p.blur_type != BlurType::None {
            check_odd_kernel("preprocess.kernel_size", p.kernel_size)?;
        }
        if p.blur_type == BlurType::Bilateral && p.bilateral_d == 0 {
            return Err(ConfigError::invalid("preprocess.bilateral_d", "must be positive"));
        }
        if p.bilateral_sigma_color <= 0.0 || p.bilateral_sigma_space <= 0.0 {
            return Err(ConfigError::invalid(
                "preprocess.bilateral_sigma_*",
                "sigmas must be positive",
            ));
        }
        if p.contrast_enhancement {
            if p.clahe_tile_size == 0 {
                return Err(ConfigError::invalid("preprocess.clahe_tile_size", "must be positive"));
            }
            if !(p.clahe_clip_limit > 0.0) {
                return Err(ConfigError::invalid("preprocess.clahe_clip_limit", "must be positive"));
            }
        }

        let d = &self.detection;
        if !(d.background_learning_rate > 0.0 && d.background_learning_rate <= 1.0) {
            return Err(ConfigError::invalid(
                "detection.background_learning_rate",
                "must lie in (0, 1]",
            ));
        }
        if !(d.background_variance_threshold > 0.0) {
            return Err(ConfigError::invalid(
                "detection.background_variance_threshold",
                "must be positive",
            ));
        }
        if d.max_threshold == 0 {
            return Err(ConfigError::invalid("detection.max_threshold", "must be positive"));
        }

        if self.morphology.enabled {
            check_odd_kernel("morphology.morph_kernel_size", self.morphology.morph_kernel_size)?;
            if self.morphology.morph_kernel_size / 2 > u8::MAX as u32 {
                return Err(ConfigError::invalid("morphology.morph_kernel_size", "too large"));
            }
        }

        let c = &self.contours;
        if c.recalc_interval == 0 {
            return Err(ConfigError::invalid("contours.recalc_interval", "must be positive"));
        }
        if !(c.contour_epsilon_factor >= 0.0) {
            return Err(ConfigError::invalid(
                "contours.contour_epsilon_factor",
                "must not be negative",
            ));
        }
        for (field, bounds) in [
            ("contours.adaptive_area_bounds", c.adaptive_area_bounds),
            ("contours.adaptive_solidity_bounds", c.adaptive_solidity_bounds),
            ("contours.adaptive_aspect_bounds", c.adaptive_aspect_bounds),
        ] {
            if bounds.min > bounds.max {
                return Err(ConfigError::invalid(field, "floor exceeds ceiling"));
            }
        }

        let t = &self.tracker;
        if !(t.max_tracking_distance > 0.0) {
            return Err(ConfigError::invalid("tracker.max_tracking_distance", "must be positive"));
        }
        check_ratio("tracker.tracking_overlap_threshold", t.tracking_overlap_threshold)?;
        check_ratio("tracker.spatial_merge_overlap", t.spatial_merge_overlap)?;
        if t.velocity_window < 2 {
            return Err(ConfigError::invalid("tracker.velocity_window", "needs at least 2 points"));
        }
        check_ratio("tracker.motion_similarity_threshold", t.motion_similarity_threshold)?;
        if t.motion_history_frames == 0 {
            return Err(ConfigError::invalid("tracker.motion_history_frames", "must be positive"));
        }
        if !(0.0..1.0).contains(&t.smoothing_factor) {
            return Err(ConfigError::invalid("tracker.smoothing_factor", "must lie in [0, 1)"));
        }
        if t.max_trajectory_points < t.velocity_window {
            return Err(ConfigError::Conflict(format!(
                "tracker.max_trajectory_points ({}) is shorter than tracker.velocity_window ({})",
                t.max_trajectory_points, t.velocity_window
            )));
        }

        let r = &self.consolidation;
        if !(r.max_distance_threshold > 0.0) {
            return Err(ConfigError::invalid(
                "consolidation.max_distance_threshold",
                "must be positive",
            ));
        }
        if r.min_objects_per_region == 0 {
            return Err(ConfigError::invalid(
                "consolidation.min_objects_per_region",
                "must be at least 1",
            ));
        }
        if !(r.region_expansion_factor >= 1.0) {
            return Err(ConfigError::invalid(
                "consolidation.region_expansion_factor",
                "must be at least 1.0",
            ));
        }
        if r.ideal_model_region_size == 0 || r.ideal_model_region_size > i32::MAX as u32 / 4 {
            return Err(ConfigError::invalid(
                "consolidation.ideal_model_region_size",
                "must be positive",
            ));
        }
        if r.size_tolerance_percent >= 100 {
            return Err(ConfigError::invalid(
                "consolidation.size_tolerance_percent",
                "must be below 100",
            ));
        }
        check_ratio("consolidation.overlap_threshold", r.overlap_threshold)?;
        check_ratio("consolidation.region_match_threshold", r.region_match_threshold)?;
        Ok(())
    }
}

fn check_odd_kernel(field: &'static str, size: u32) -> Result<(), ConfigError> {
    if size == 0 || size % 2 == 0 {
        return Err(ConfigError::invalid(field, format!("kernel size {size} must be odd")));
    }
    Ok(())
}

fn check_ratio(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(ConfigError::invalid(field, format!("{value} is outside (0, 1]")));
    }
    Ok(())
}

/// Loads configuration from `path` (if it exists) and `ROOST__*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    build_config(path, roost_environment())
}

fn roost_environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn build_config(
    path: Option<&Path>,
    environment: config::Environment,
) -> Result<PipelineConfig, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    let raw: PipelineConfig = builder
        .add_source(environment)
        .build()?
        .try_deserialize()?;
    let config = raw.normalized()?;
    info!(
        path = ?path,
        mode = ?config.contours.contour_detection_mode,
        background = config.detection.background_subtraction,
        "pipeline configuration loaded"
    );
    Ok(config)
}

/// Parses configuration from an in-memory string, without environment overrides.
pub fn parse_config(
    source: &str,
    format: config::FileFormat,
) -> Result<PipelineConfig, ConfigError> {
    let raw: PipelineConfig = config::Config::builder()
        .add_source(config::File::from_str(source, format))
        .build()?
        .try_deserialize()?;
    raw.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn empty_source_yields_defaults() {
        let config = parse_config("", FileFormat::Toml).unwrap();
        assert_eq!(config.preprocess.kernel_size, 5);
        assert_eq!(config.contours.recalc_interval, 150);
        assert_eq!(config.consolidation.ideal_model_region_size, 640);
        assert_eq!(config.consolidation.size_tolerance_percent, 30);
        assert_eq!(config.tracker.smoothing_factor, 0.6);
        assert!(!config.tracker.motion_clustering);
        assert!(!config.detection.background_subtraction);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let toml = r#"
            colour_of_the_sky = "blue"

            [contours]
            contour_detection_mode = "permissive"
            some_future_option = 3
        "#;
        let config = parse_config(toml, FileFormat::Toml).unwrap();
        assert_eq!(
            config.contours.contour_detection_mode,
            ContourDetectionMode::Permissive
        );
    }

    #[test]
    fn camel_case_consolidation_keys_are_accepted() {
        let json =
            r#"{ "consolidation": { "idealModelRegionSize": 320, "overlapThreshold": 0.5 } }"#;
        let config = parse_config(json, FileFormat::Json).unwrap();
        assert_eq!(config.consolidation.ideal_model_region_size, 320);
        assert_eq!(config.consolidation.overlap_threshold, 0.5);
    }

    #[test]
    fn even_kernel_is_rejected() {
        let toml = "[morphology]\nmorph_kernel_size = 4\n";
        let err = parse_config(toml, FileFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "morphology.morph_kernel_size", .. }));
    }

    #[test]
    fn adaptive_bounds_are_clamped_into_hard_limits() {
        let toml = "[contours]\nadaptive_solidity_bounds = { min = -0.5, max = 3.0 }\n";
        let config = parse_config(toml, FileFormat::Toml).unwrap();
        assert_eq!(config.contours.adaptive_solidity_bounds, Bounds::new(0.0, 1.0));
    }

    #[test]
    fn inverted_bounds_are_a_config_error() {
        let toml = "[contours]\nadaptive_area_bounds = { min = 900.0, max = 100.0 }\n";
        assert!(parse_config(toml, FileFormat::Toml).is_err());
    }

    #[test]
    fn zero_recalc_interval_is_rejected() {
        let toml = "[contours]\nrecalc_interval = 0\n";
        assert!(parse_config(toml, FileFormat::Toml).is_err());
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        roost_environment().source(Some(map))
    }

    #[test]
    fn environment_overrides_defaults() {
        let env = environment(&[
            ("ROOST__CONSOLIDATION__OVERLAP_THRESHOLD", "0.4"),
            ("ROOST__TRACKER__MAX_MISSES", "9"),
            ("UNRELATED__TRACKER__MAX_MISSES", "1"),
        ]);
        let config = build_config(None, env).unwrap();
        assert_eq!(config.consolidation.overlap_threshold, 0.4);
        assert_eq!(config.tracker.max_misses, 9);
    }

    #[test]
    fn invalid_environment_value_is_rejected() {
        let env = environment(&[("ROOST__CONSOLIDATION__OVERLAP_THRESHOLD", "1.5")]);
        assert!(build_config(None, env).is_err());
    }

    #[test]
    fn environment_wins_over_yaml_file() {
        let path = std::env::temp_dir().join(format!(
            "roost_vision_config_{}_{:?}.yaml",
            std::process::id(),
            std::thread::current().id()
        ));
        let yaml = "consolidation:\n  maxFramesWithoutUpdate: 12\n  min_objects_per_region: 3\n";
        std::fs::write(&path, yaml).unwrap();

        let env = environment(&[("ROOST__CONSOLIDATION__MIN_OBJECTS_PER_REGION", "4")]);
        let loaded = build_config(Some(&path), env);
        std::fs::remove_file(&path).ok();

        let config = loaded.unwrap();
        assert_eq!(config.consolidation.max_frames_without_update, 12);
        assert_eq!(config.consolidation.min_objects_per_region, 4);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("roost_vision_config_that_does_not_exist.toml");
        let config = build_config(Some(&path), environment(&[])).unwrap();
        assert_eq!(config.consolidation.max_frames_without_update, 10);
    }

    #[test]
    fn camel_case_yaml_keys_are_accepted() {
        let yaml = "consolidation:\n  maxFramesWithoutUpdate: 7\n  regionExpansionFactor: 1.5\n";
        let config = parse_config(yaml, FileFormat::Yaml).unwrap();
        assert_eq!(config.consolidation.max_frames_without_update, 7);
        assert_eq!(config.consolidation.region_expansion_factor, 1.5);
    }

    #[test]
    fn tracker_smoothing_must_stay_below_one() {
        let toml = "[tracker]\nsmoothing_factor = 1.0\n";
        let err = parse_config(toml, FileFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "tracker.smoothing_factor", .. }));
    }
}
