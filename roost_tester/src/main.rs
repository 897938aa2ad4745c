mod logging;

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use roost_vision::config::load_config;
use roost_vision::core_modules::crop::extract_region_crops;
use roost_vision::pipeline::{FrameBuffer, FrameReport, Rect};
use roost_vision::streams::{HubOptions, StreamHub, StreamReport};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

const MOTION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const REGION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Runs directories of frames through the motion engine and writes annotated copies.
#[derive(Parser, Debug)]
#[command(name = "roost_tester", version)]
struct Cli {
    /// One directory of frames per stream, read in file-name order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Where annotated frames are written, one subdirectory per stream.
    #[arg(short, long, default_value = "roost_output")]
    output: PathBuf,
    /// Configuration file; `ROOST__*` environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Also write the classifier crops of every region.
    #[arg(long)]
    crops: bool,
    /// Frame rate used to derive timestamps.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
    /// Frames each stream may queue.
    #[arg(long, default_value_t = 4)]
    queue_depth: usize,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct Input {
    stream_id: String,
    frames: Vec<PathBuf>,
}

/// Decoded frames waiting for their report, keyed by stream and frame id.
type PendingImages = Arc<Mutex<HashMap<(String, u64), RgbImage>>>;

#[derive(Default)]
struct Summary {
    frames: u64,
    with_motion: u64,
    regions: u64,
    failed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let ideal = config.consolidation.ideal_model_region_size;

    // --- 2. Input Discovery ---
    let mut inputs = Vec::new();
    for dir in &cli.inputs {
        let stream_id = stream_name(dir);
        let frames = list_frames(dir)?;
        if frames.is_empty() {
            warn!(stream = %stream_id, dir = %dir.display(), "no frames found, skipping");
            continue;
        }
        fs::create_dir_all(cli.output.join(&stream_id))
            .with_context(|| format!("failed to create output for `{stream_id}`"))?;
        info!(stream = %stream_id, frames = frames.len(), "input found");
        inputs.push(Input { stream_id, frames });
    }
    if inputs.is_empty() {
        bail!("none of the input directories hold any frames");
    }

    // --- 3. Engine Initialization ---
    let options = HubOptions {
        queue_depth: cli.queue_depth,
        ..HubOptions::default()
    };
    let (mut hub, reports) = StreamHub::new(config, options);
    for input in &inputs {
        hub.add_stream(input.stream_id.clone())?;
    }

    let pending: PendingImages = Arc::new(Mutex::new(HashMap::new()));
    let writer = tokio::spawn(write_reports(
        reports,
        pending.clone(),
        cli.output.clone(),
        cli.crops.then_some(ideal),
    ));

    // --- 4. Feeding Loop ---
    let longest = inputs.iter().map(|i| i.frames.len()).max().unwrap_or(0);
    let frame_ms = if cli.fps > 0.0 { 1000.0 / cli.fps } else { 0.0 };
    for index in 0..longest {
        for input in &inputs {
            let Some(path) = input.frames.get(index) else {
                continue;
            };
            let image = image::open(path)
                .with_context(|| format!("failed to read {}", path.display()))?
                .to_rgb8();
            let frame_id = index as u64;
            let timestamp_ms = (index as f64 * frame_ms).round() as u64;
            let buffer = FrameBuffer::from_rgb(&image, frame_id, timestamp_ms);
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert((input.stream_id.clone(), frame_id), image);
            hub.send_frame(&input.stream_id, buffer).await?;

            if index + 1 == input.frames.len() {
                // Last frame queued: let the stream drain and free its pipeline.
                hub.remove_stream(&input.stream_id).await?;
                info!(stream = %input.stream_id, "stream finished");
            }
        }
    }

    // --- 5. Drain & Summary ---
    hub.shutdown().await;
    let summary = writer.await.context("report writer panicked")??;
    info!(
        frames = summary.frames,
        with_motion = summary.with_motion,
        regions = summary.regions,
        failed = summary.failed,
        output = %cli.output.display(),
        "processing complete"
    );
    Ok(())
}

async fn write_reports(
    mut reports: tokio::sync::mpsc::Receiver<StreamReport>,
    pending: PendingImages,
    output: PathBuf,
    crop_size: Option<u32>,
) -> Result<Summary> {
    let mut summary = Summary::default();
    while let Some(StreamReport {
        stream_id,
        frame_id,
        result,
    }) = reports.recv().await
    {
        summary.frames += 1;
        let image = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(stream_id.clone(), frame_id));
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                summary.failed += 1;
                warn!(stream = %stream_id, frame = frame_id, error = %e, "frame failed");
                continue;
            }
        };
        if report.has_motion() {
            summary.with_motion += 1;
        }
        summary.regions += report.regions.len() as u64;

        let Some(mut image) = image else {
            continue;
        };
        let dir = output.join(&stream_id);

        let stem = format!("frame_{frame_id:05}");
        if let Some(ideal) = crop_size {
            let buffer = FrameBuffer::from_rgb(&image, frame_id, report.timestamp_ms);
            for crop in extract_region_crops(&buffer.as_frame(), &report.regions, ideal) {
                let region = crop.region_id;
                let name = match crop.tile {
                    Some((row, col)) => format!("{stem}_region_{region}_{row}_{col}.png"),
                    None => format!("{stem}_region_{region}.png"),
                };
                crop.image.save(dir.join(name))?;
            }
        }

        annotate(&mut image, &report);
        image.save(dir.join(format!("{stem}.png")))?;
    }
    Ok(summary)
}

/// Draws motion boxes in green and regions in red.
fn annotate(image: &mut RgbImage, report: &FrameReport) {
    for rect in &report.motion_boxes {
        draw_box(image, rect, MOTION_COLOR);
    }
    for region in &report.regions {
        draw_box(image, &region.bounding_box, REGION_COLOR);
    }
}

fn draw_box(image: &mut RgbImage, rect: &Rect, color: Rgb<u8>) {
    if rect.is_empty() {
        return;
    }
    let outline =
        imageproc::rect::Rect::at(rect.x, rect.y).of_size(rect.width as u32, rect.height as u32);
    draw_hollow_rect_mut(image, outline, color);
}

fn stream_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stream".to_string())
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    frames.sort();
    Ok(frames)
}
