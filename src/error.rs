use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Unsupported pixel format: {0}")]
    InvalidPixelFormat(String),

    #[error("Invalid crop geometry: {0}")]
    InvalidCropGeometry(String),

    #[error("Invalid resize geometry: {0}")]
    InvalidResizeGeometry(String),

    #[error("Frame dimensions must be even, got {width}x{height}")]
    OddDimension { width: u32, height: u32 },

    #[error("Frame size must be non-zero")]
    EmptyFrameSize,

    #[error("Failed to spawn {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipe already closed")]
    PipeClosed,

    #[error("Frame buffer too small: need {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Frame shape mismatch: source yields {source_bytes} bytes, sink expects {sink_bytes}")]
    ShapeMismatch { source_bytes: usize, sink_bytes: usize },

    #[error("No GPU device found")]
    NoDeviceFound,

    #[error("No GPU codec available for {0}")]
    UnsupportedCodec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] crate::ffmpeg::FfmpegError),
}

pub type Result<T> = std::result::Result<T, MediaError>;
