// THEORY:
// The `pipeline` module is the top-level API for the entire engine. It chains the
// layers into a single per-stream object with one call per frame:
//
//     frame -> planes -> motion mask -> cleaned mask -> motion boxes
//           -> tracked objects -> consolidated regions
//
// Processing is strictly sequential. Every stage that remembers something across
// frames (detector, tracker, consolidator) is owned by this struct, so two
// pipelines never share state and one pipeline per camera is all it takes to run
// several cameras at once.
//
// A frame that fails validation is rejected before any stage sees it, leaving the
// pipeline exactly as it was.

use crate::config::PipelineConfig;
use crate::core_modules::contour_filter::ContourFilter;
use crate::core_modules::crop::extract_region_crops;
use crate::core_modules::geometry::FrameSize;
use crate::core_modules::mask_cleaner::MaskCleaner;
use crate::core_modules::motion_detector::MotionDetector;
use crate::core_modules::preprocessor::FramePreprocessor;
use crate::core_modules::region_consolidator::RegionConsolidator;
use crate::core_modules::tracker::MotionTracker;
use crate::error::{ConfigError, FrameError, PipelineError};
use image::GrayImage;
use tracing::{Span, debug, debug_span, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::adaptive_thresholds::FilterThresholds;
pub use crate::core_modules::contour_filter::{FilterStats, MotionBox};
pub use crate::core_modules::crop::RegionCrop;
pub use crate::core_modules::frame::{Frame, FrameBuffer};
pub use crate::core_modules::geometry::Rect;
pub use crate::core_modules::region_consolidator::ConsolidatedRegion;
pub use crate::core_modules::tracker::{TrackState, TrackedObject};

/// Intermediate images of one frame, kept when `debug.keep_stages` is set.
#[derive(Debug, Clone)]
pub struct DebugStages {
    pub processed: Vec<GrayImage>,
    pub difference: GrayImage,
    pub mask: GrayImage,
    pub cleaned: GrayImage,
}

/// Everything the pipeline learned from one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    /// Boxes that passed the contour filter on this frame.
    pub motion_boxes: Vec<MotionBox>,
    /// The tracker's table after this frame, ordered by id.
    pub tracked_objects: Vec<TrackedObject>,
    /// Objects dropped on this frame.
    pub lost_object_ids: Vec<u64>,
    /// Regions to hand to the classifier.
    pub regions: Vec<ConsolidatedRegion>,
    pub filter_stats: FilterStats,
    pub thresholds: FilterThresholds,
    pub stages: Option<DebugStages>,
}

impl FrameReport {
    pub fn has_motion(&self) -> bool {
        !self.motion_boxes.is_empty()
    }
}

/// The stages that carry state from frame to frame.
struct Stages {
    preprocessor: FramePreprocessor,
    detector: MotionDetector,
    cleaner: MaskCleaner,
    contour_filter: ContourFilter,
    tracker: MotionTracker,
    consolidator: RegionConsolidator,
}

impl Stages {
    fn build(config: &PipelineConfig, span: &Span) -> Result<Self, ConfigError> {
        Ok(Self {
            preprocessor: FramePreprocessor::new(
                config.preprocess.clone(),
                debug_span!(parent: span, "preprocess"),
            )?,
            detector: MotionDetector::new(
                config.detection.clone(),
                debug_span!(parent: span, "detect"),
            ),
            cleaner: MaskCleaner::new(
                config.morphology.clone(),
                debug_span!(parent: span, "morphology"),
            ),
            contour_filter: ContourFilter::new(
                config.contours.clone(),
                debug_span!(parent: span, "contours"),
            ),
            tracker: MotionTracker::new(config.tracker.clone(), debug_span!(parent: span, "track")),
            consolidator: RegionConsolidator::new(
                config.consolidation.clone(),
                debug_span!(parent: span, "consolidate"),
            ),
        })
    }
}

/// The main, per-stream entry point of the engine.
pub struct MotionPipeline {
    config: PipelineConfig,
    stages: Stages,
    /// Dimensions and channel count of the session, fixed by its first accepted frame.
    frame_shape: Option<(FrameSize, u8)>,
    frames_processed: u64,
    span: Span,
}

impl MotionPipeline {
    /// Validates `config` and builds every stage. Components log under `span`.
    pub fn new(config: PipelineConfig, span: Span) -> Result<Self, ConfigError> {
        let config = config.normalized()?;
        let stages = Stages::build(&config, &span)?;
        info!(
            parent: &span,
            mode = ?config.contours.contour_detection_mode,
            processing = ?config.preprocess.processing_mode,
            background = config.detection.background_subtraction,
            ideal = config.consolidation.ideal_model_region_size,
            "motion pipeline ready"
        );
        Ok(Self {
            config,
            stages,
            frame_shape: None,
            frames_processed: 0,
            span,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn frame_size(&self) -> Option<FrameSize> {
        self.frame_shape.map(|(size, _)| size)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn tracked_objects(&self) -> &[TrackedObject] {
        self.stages.tracker.objects()
    }

    /// The consolidator's persistent, untiled region table.
    pub fn region_table(&self) -> &[ConsolidatedRegion] {
        self.stages.consolidator.regions()
    }

    /// Drops all cross-frame state, e.g. after the camera was moved.
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        self.stages = Stages::build(&self.config, &self.span)?;
        self.frame_shape = None;
        info!(parent: &self.span, "motion pipeline reset");
        Ok(())
    }

    fn check_frame(&self, frame: &Frame) -> Result<(), FrameError> {
        frame.validate()?;
        let Some((expected, channels)) = self.frame_shape else {
            return Ok(());
        };
        if expected != frame.size() {
            return Err(FrameError::DimensionMismatch {
                expected_width: expected.width,
                expected_height: expected.height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }
        if channels != frame.channels {
            return Err(FrameError::ChannelMismatch {
                expected: channels,
                actual: frame.channels,
            });
        }
        Ok(())
    }

    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport, PipelineError> {
        if let Err(source) = self.check_frame(frame) {
            warn!(parent: &self.span, frame = frame.index, error = %source, "frame skipped");
            return Err(PipelineError::Frame {
                index: frame.index,
                source,
            });
        }
        let size = frame.size();
        let keep_stages = self.config.debug.keep_stages;

        // Stage 1: Preprocessing
        let planes = self
            .stages
            .preprocessor
            .process(frame)
            .map_err(|source| PipelineError::Frame {
                index: frame.index,
                source,
            })?;
        self.frame_shape = Some((size, frame.channels));
        let processed = keep_stages.then(|| planes.clone());

        // Stage 2: Motion Detection
        let motion = self.stages.detector.detect(planes);

        // Stage 3: Mask Cleaning
        let cleaned = self.stages.cleaner.clean(&motion.mask);

        // Stage 4: Contour Extraction & Filtering
        let contours = self.stages.contour_filter.extract(&cleaned);

        // Stage 5: Tracking
        let tracked_objects = self
            .stages
            .tracker
            .update(&contours.boxes, frame.index)
            .to_vec();
        let lost_object_ids = self.stages.tracker.lost_object_ids().to_vec();

        // Stage 6: Region Consolidation
        let regions = self
            .stages
            .consolidator
            .consolidate(&tracked_objects, size, frame.index);

        self.frames_processed += 1;
        debug!(
            parent: &self.span,
            frame = frame.index,
            boxes = contours.boxes.len(),
            objects = tracked_objects.len(),
            lost = lost_object_ids.len(),
            regions = regions.len(),
            "frame processed"
        );

        let stages = processed.map(|processed| DebugStages {
            processed,
            difference: motion.difference,
            mask: motion.mask,
            cleaned,
        });
        Ok(FrameReport {
            frame_index: frame.index,
            timestamp_ms: frame.timestamp_ms,
            motion_boxes: contours.boxes,
            tracked_objects,
            lost_object_ids,
            regions,
            filter_stats: contours.stats,
            thresholds: contours.thresholds,
            stages,
        })
    }

    /// Classifier inputs for the regions of `report`, cut from `frame`.
    pub fn region_crops(&self, frame: &Frame, report: &FrameReport) -> Vec<RegionCrop> {
        extract_region_crops(
            frame,
            &report.regions,
            self.config.consolidation.ideal_model_region_size,
        )
    }
}
