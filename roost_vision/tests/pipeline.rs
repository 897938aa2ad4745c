use roost_vision::config::{BlurType, ContourDetectionMode, PipelineConfig, ThresholdMode};
use roost_vision::error::{FrameError, PipelineError};
use roost_vision::pipeline::{Frame, MotionPipeline, Rect};
use std::collections::BTreeSet;
use tracing::Span;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const SIDE: u32 = 30;
const STEP: u32 = 8;

/// Two bright squares on a dark background: one moving right along the top,
/// one moving left along the bottom.
fn scene(t: u32) -> Vec<u8> {
    let mut data = vec![20u8; (WIDTH * HEIGHT) as usize];
    let mut paint = |x0: u32, y0: u32| {
        for y in y0..y0 + SIDE {
            for x in x0..x0 + SIDE {
                data[(y * WIDTH + x) as usize] = 220;
            }
        }
    };
    paint(20 + STEP * t, 40);
    paint(260 - STEP * t, 160);
    data
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.preprocess.blur_type = BlurType::None;
    config.detection.threshold_mode = ThresholdMode::Fixed;
    config.contours.contour_detection_mode = ContourDetectionMode::Permissive;
    config
}

fn pipeline(config: PipelineConfig) -> MotionPipeline {
    MotionPipeline::new(config, Span::none()).unwrap()
}

fn ids_of(pipeline: &MotionPipeline) -> BTreeSet<u64> {
    pipeline.tracked_objects().iter().map(|o| o.id).collect()
}

#[test]
fn first_frame_reports_no_motion() {
    let mut pipeline = pipeline(test_config());
    let data = scene(0);
    let report = pipeline.process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, 0)).unwrap();
    assert!(!report.has_motion());
    assert!(report.tracked_objects.is_empty());
    assert!(report.regions.is_empty());
    assert_eq!(pipeline.frames_processed(), 1);
}

#[test]
fn moving_objects_keep_their_ids() {
    let mut pipeline = pipeline(test_config());
    let mut seen = Vec::new();
    for t in 0..8 {
        let data = scene(t);
        let report = pipeline
            .process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, t as u64))
            .unwrap();
        if t >= 1 {
            assert!(report.has_motion(), "frame {t} should see motion");
            assert!(report.lost_object_ids.is_empty());
        }
        seen.push(ids_of(&pipeline));
    }
    assert!(!seen[2].is_empty());
    assert_eq!(seen[2], seen[7]);

    // Every tracked object is still on the top or bottom band of the scene.
    for object in pipeline.tracked_objects() {
        let (_, cy) = object.center();
        assert!((30.0..=80.0).contains(&cy) || (150.0..=200.0).contains(&cy), "{cy}");
        assert_eq!(object.consecutive_misses, 0);
    }
}

#[test]
fn regions_stay_inside_the_frame() {
    let mut pipeline = pipeline(test_config());
    let frame_box = Rect::new(0, 0, WIDTH as i32, HEIGHT as i32);
    for t in 0..6 {
        let data = scene(t);
        let report = pipeline
            .process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, t as u64))
            .unwrap();
        let tracked: BTreeSet<u64> = report.tracked_objects.iter().map(|o| o.id).collect();
        for region in &report.regions {
            assert!(frame_box.contains(&region.bounding_box), "{:?}", region.bounding_box);
            assert!(!region.bounding_box.is_empty());
            assert!(region.member_object_ids.is_subset(&tracked));
        }
        if t >= 2 {
            assert!(!report.regions.is_empty(), "frame {t} should emit a region");
        }
    }
}

#[test]
fn bad_frame_leaves_state_untouched() {
    let mut pipeline = pipeline(test_config());
    for t in 0..3 {
        let data = scene(t);
        pipeline
            .process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, t as u64))
            .unwrap();
    }
    let ids = ids_of(&pipeline);
    let regions = pipeline.region_table().to_vec();

    let short = vec![0u8; 100];
    let err = pipeline
        .process_frame(&Frame::new(&short, WIDTH, HEIGHT, 1, 3))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Frame {
            index: 3,
            source: FrameError::BufferSize { .. }
        }
    ));
    assert_eq!(pipeline.frames_processed(), 3);
    assert_eq!(ids_of(&pipeline), ids);
    assert_eq!(pipeline.region_table(), regions.as_slice());

    // The session carries on as if the bad frame never arrived.
    let data = scene(3);
    let report = pipeline.process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, 4)).unwrap();
    assert!(report.has_motion());
    assert_eq!(ids_of(&pipeline), ids);
}

#[test]
fn frame_size_is_fixed_by_the_first_frame() {
    let mut pipeline = pipeline(test_config());
    let data = scene(0);
    pipeline.process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, 0)).unwrap();

    let small = vec![20u8; 160 * 120];
    let err = pipeline
        .process_frame(&Frame::new(&small, 160, 120, 1, 1))
        .unwrap_err();
    let PipelineError::Frame { source, .. } = err;
    assert_eq!(
        source,
        FrameError::DimensionMismatch {
            expected_width: WIDTH,
            expected_height: HEIGHT,
            actual_width: 160,
            actual_height: 120,
        }
    );

    pipeline.reset().unwrap();
    assert!(pipeline.frame_size().is_none());
    let report = pipeline.process_frame(&Frame::new(&small, 160, 120, 1, 2)).unwrap();
    assert!(!report.has_motion());
}

#[test]
fn channel_count_is_fixed_by_the_first_frame() {
    let mut config = test_config();
    config.preprocess.processing_mode = roost_vision::config::ProcessingMode::Rgb;
    let mut pipeline = pipeline(config);
    for t in 0..2 {
        let rgb: Vec<u8> = scene(t).into_iter().flat_map(|v| [v, v, v]).collect();
        pipeline
            .process_frame(&Frame::new(&rgb, WIDTH, HEIGHT, 3, t as u64))
            .unwrap();
    }
    let ids = ids_of(&pipeline);
    let regions = pipeline.region_table().to_vec();

    let gray = scene(2);
    let err = pipeline
        .process_frame(&Frame::new(&gray, WIDTH, HEIGHT, 1, 2))
        .unwrap_err();
    let PipelineError::Frame { index, source } = err;
    assert_eq!(index, 2);
    assert_eq!(source, FrameError::ChannelMismatch { expected: 3, actual: 1 });
    assert_eq!(pipeline.frames_processed(), 2);
    assert_eq!(ids_of(&pipeline), ids);
    assert_eq!(pipeline.region_table(), regions.as_slice());

    pipeline.reset().unwrap();
    let report = pipeline.process_frame(&Frame::new(&gray, WIDTH, HEIGHT, 1, 3)).unwrap();
    assert!(!report.has_motion());
}

#[test]
fn zero_sized_frame_is_rejected() {
    let mut pipeline = pipeline(test_config());
    let err = pipeline.process_frame(&Frame::new(&[], 0, 0, 1, 0)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Frame {
            source: FrameError::Empty { .. },
            ..
        }
    ));
    assert!(pipeline.frame_size().is_none());
}

#[test]
fn debug_stages_are_kept_on_request() {
    let mut config = test_config();
    config.debug.keep_stages = true;
    let mut pipeline = pipeline(config);
    for t in 0..2 {
        let data = scene(t);
        let report = pipeline
            .process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, t as u64))
            .unwrap();
        let stages = report.stages.expect("stages kept");
        assert_eq!(stages.processed.len(), 1);
        assert_eq!(stages.cleaned.dimensions(), (WIDTH, HEIGHT));
        let moving = stages.mask.pixels().filter(|p| p[0] > 0).count();
        if t == 0 {
            assert_eq!(moving, 0);
        } else {
            assert!(moving > 0);
        }
    }

    let mut plain = pipeline_without_stages();
    let data = scene(0);
    let report = plain.process_frame(&Frame::new(&data, WIDTH, HEIGHT, 1, 0)).unwrap();
    assert!(report.stages.is_none());
}

fn pipeline_without_stages() -> MotionPipeline {
    pipeline(test_config())
}

#[test]
fn color_frames_are_accepted() {
    let mut config = test_config();
    config.preprocess.processing_mode = roost_vision::config::ProcessingMode::Rgb;
    let mut pipeline = pipeline(config);
    for t in 0..3 {
        let rgb: Vec<u8> = scene(t).into_iter().flat_map(|v| [v, v / 2, 255 - v]).collect();
        let report = pipeline
            .process_frame(&Frame::new(&rgb, WIDTH, HEIGHT, 3, t as u64))
            .unwrap();
        assert_eq!(report.has_motion(), t > 0);
    }
}

#[test]
fn crops_match_the_emitted_regions() {
    let mut config = test_config();
    config.consolidation.ideal_model_region_size = 128;
    let mut pipeline = pipeline(config);
    let mut last = None;
    for t in 0..4 {
        let data = scene(t);
        let frame = Frame::new(&data, WIDTH, HEIGHT, 1, t as u64);
        let report = pipeline.process_frame(&frame).unwrap();
        let crops = pipeline.region_crops(&frame, &report);
        assert_eq!(crops.len(), report.regions.len());
        for (crop, region) in crops.iter().zip(&report.regions) {
            assert_eq!(crop.region_id, region.id);
            assert_eq!(crop.tile, region.tile);
            assert_eq!(crop.frame_index, t as u64);
            assert_eq!(crop.image.dimensions(), (128, 128));
        }
        last = Some(report);
    }
    assert!(!last.unwrap().regions.is_empty());
}

#[test]
fn invalid_config_is_refused() {
    let mut config = test_config();
    config.tracker.velocity_window = 1;
    assert!(MotionPipeline::new(config, Span::none()).is_err());
}
