// THEORY:
// `streams` runs one `MotionPipeline` per camera on a tokio runtime.
//
// Each stream gets its own worker task that owns its pipeline outright, so streams
// never share tracker or region state. Frames reach a worker through a small
// bounded queue. When the queue is full the frame is dropped on the spot and
// counted: a late frame carries stale motion, so skipping beats queueing.
//
// The per-frame work is CPU-bound, so the worker moves its pipeline onto the
// blocking thread pool for each frame and takes it back afterwards. A shared
// semaphore sized to the CPU count caps how many frames are processed at once
// across all streams. Within a stream frames are processed strictly in order.
//
// Reports from all streams are delivered on a single channel, tagged with the
// stream id, so the caller can fan results out to storage or the classifier.

use crate::config::PipelineConfig;
use crate::core_modules::frame::FrameBuffer;
use crate::error::{PipelineError, StreamError};
use crate::pipeline::{FrameReport, MotionPipeline};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn};

const DEFAULT_QUEUE_DEPTH: usize = 2;
const REPORT_QUEUE_DEPTH: usize = 64;

/// Result of processing one frame of one stream.
#[derive(Debug)]
pub struct StreamReport {
    pub stream_id: String,
    pub frame_id: u64,
    pub result: Result<FrameReport, PipelineError>,
}

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// The stream's queue was full; the frame was discarded.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Frames a stream may hold before new ones are dropped.
    pub queue_depth: usize,
    /// Frames processed concurrently across all streams.
    pub max_parallel: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_parallel: num_cpus::get(),
        }
    }
}

struct StreamHandle {
    frames: mpsc::Sender<FrameBuffer>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

pub struct StreamHub {
    config: PipelineConfig,
    options: HubOptions,
    permits: Arc<Semaphore>,
    reports: mpsc::Sender<StreamReport>,
    streams: HashMap<String, StreamHandle>,
}

impl StreamHub {
    /// Creates a hub and the receiver its reports arrive on.
    pub fn new(
        config: PipelineConfig,
        options: HubOptions,
    ) -> (Self, mpsc::Receiver<StreamReport>) {
        let (reports, receiver) = mpsc::channel(REPORT_QUEUE_DEPTH);
        let hub = Self {
            config,
            permits: Arc::new(Semaphore::new(options.max_parallel)),
            options,
            reports,
            streams: HashMap::new(),
        };
        (hub, receiver)
    }

    /// Registers a stream with its own pipeline. Must be called inside a tokio runtime.
    pub fn add_stream(&mut self, stream_id: impl Into<String>) -> Result<(), StreamError> {
        let stream_id = stream_id.into();
        if self.streams.contains_key(&stream_id) {
            return Err(StreamError::DuplicateStream(stream_id));
        }
        let span = info_span!("stream", id = %stream_id);
        let pipeline = MotionPipeline::new(self.config.clone(), span)?;
        let (frames, receiver) = mpsc::channel(self.options.queue_depth.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(run_stream(
            stream_id.clone(),
            pipeline,
            receiver,
            self.reports.clone(),
            self.permits.clone(),
        ));
        info!(stream = %stream_id, queue_depth = self.options.queue_depth, "stream added");
        self.streams.insert(
            stream_id,
            StreamHandle {
                frames,
                dropped,
                worker,
            },
        );
        Ok(())
    }

    /// Hands a frame to a stream without waiting.
    pub fn offer_frame(&self, stream_id: &str, frame: FrameBuffer) -> Result<Offer, StreamError> {
        let handle = self
            .streams
            .get(stream_id)
            .ok_or_else(|| StreamError::UnknownStream(stream_id.to_string()))?;
        match handle.frames.try_send(frame) {
            Ok(()) => Ok(Offer::Queued),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let total = handle.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    stream = stream_id,
                    frame = frame.frame_id,
                    dropped = total,
                    "stream busy, frame dropped"
                );
                Ok(Offer::Dropped)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(StreamError::Closed(stream_id.to_string()))
            }
        }
    }

    /// Hands a frame to a stream, waiting for queue space instead of dropping.
    pub async fn send_frame(&self, stream_id: &str, frame: FrameBuffer) -> Result<(), StreamError> {
        let handle = self
            .streams
            .get(stream_id)
            .ok_or_else(|| StreamError::UnknownStream(stream_id.to_string()))?;
        handle
            .frames
            .send(frame)
            .await
            .map_err(|_| StreamError::Closed(stream_id.to_string()))
    }

    pub fn dropped_frames(&self, stream_id: &str) -> Option<u64> {
        self.streams
            .get(stream_id)
            .map(|h| h.dropped.load(Ordering::Relaxed))
    }

    /// Stops a stream after it has finished its queued frames.
    pub async fn remove_stream(&mut self, stream_id: &str) -> Result<(), StreamError> {
        let handle = self
            .streams
            .remove(stream_id)
            .ok_or_else(|| StreamError::UnknownStream(stream_id.to_string()))?;
        drop(handle.frames);
        if let Err(e) = handle.worker.await {
            error!(stream = stream_id, error = %e, "stream worker failed");
        }
        Ok(())
    }

    /// Stops every stream after its queued frames are processed.
    pub async fn shutdown(self) {
        let (ids, workers): (Vec<String>, Vec<JoinHandle<()>>) = self
            .streams
            .into_iter()
            .map(|(id, handle)| {
                drop(handle.frames);
                (id, handle.worker)
            })
            .unzip();
        for (id, result) in ids.iter().zip(join_all(workers).await) {
            if let Err(e) = result {
                error!(stream = %id, error = %e, "stream worker failed");
            }
        }
        info!(streams = ids.len(), "stream hub shut down");
    }
}

async fn run_stream(
    stream_id: String,
    mut pipeline: MotionPipeline,
    mut frames: mpsc::Receiver<FrameBuffer>,
    reports: mpsc::Sender<StreamReport>,
    permits: Arc<Semaphore>,
) {
    while let Some(buffer) = frames.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let frame_id = buffer.frame_id;
        let joined = tokio::task::spawn_blocking(move || {
            let result = pipeline.process_frame(&buffer.as_frame());
            drop(permit);
            (pipeline, result)
        })
        .await;

        let result = match joined {
            Ok((returned, result)) => {
                pipeline = returned;
                result
            }
            Err(e) => {
                error!(stream = %stream_id, frame = frame_id, error = %e, "pipeline task failed");
                return;
            }
        };
        let report = StreamReport {
            stream_id: stream_id.clone(),
            frame_id,
            result,
        };
        if reports.send(report).await.is_err() {
            break;
        }
    }
    info!(stream = %stream_id, frames = pipeline.frames_processed(), "stream stopped");
}
