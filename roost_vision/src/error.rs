// THEORY:
// Errors are split along the two ways a caller can misuse the engine. A bad
// configuration is caught once, before any frame is processed, and stops the
// pipeline from being built. A bad frame is caught per call and only costs that
// frame: validation runs before any state is touched, so the pipeline is left
// exactly as it was. Degenerate geometry (zero-area contours, empty hulls) is not
// an error at all; it simply fails the contour filter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("conflicting options: {0}")]
    Conflict(String),
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("unsupported channel count {0}; expected 1, 3 or 4")]
    UnsupportedChannels(u8),
    #[error("buffer holds {actual} bytes but {width}x{height}x{channels} needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
    #[error("frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("frame has {actual} channels but the session runs at {expected}")]
    ChannelMismatch { expected: u8, actual: u8 },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("frame {index} skipped: {source}")]
    Frame {
        index: u64,
        #[source]
        source: FrameError,
    },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no stream registered as `{0}`")]
    UnknownStream(String),
    #[error("stream `{0}` is already registered")]
    DuplicateStream(String),
    #[error("stream `{0}` has shut down")]
    Closed(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
