// THEORY:
// This file is the main entry point for the `roost_vision` library crate.
// It defines the public API handed to capture and classification services.
//
// The primary export is `MotionPipeline` (with `PipelineConfig` and `FrameReport`):
// one instance per camera stream, fed one frame at a time, answering with the
// tracked objects and the classifier-ready regions for that frame. The stages it
// chains live in `core_modules` and are public for callers that want to run them
// individually. `streams` runs many pipelines side by side on a tokio runtime.
//
// The library never installs a tracing subscriber; every component logs into the
// span it was handed at construction.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod streams;
