//! framepipe - raw video frames in and out of an external ffmpeg process
//!
//! Decoding and encoding are delegated to the system `ffmpeg` binary (no
//! linking); frames cross an anonymous pipe as fixed-size raw buffers.

pub mod device;
mod error;
mod ffmpeg;
pub mod filter;
mod format;
pub mod metrics;
mod pipe;
pub mod probe;
mod sink;
mod source;
mod transcode;

pub use device::{Backend, DeviceRegistry};
pub use error::{MediaError, Result};
pub use ffmpeg::{FfmpegCommand, FfmpegError, Toolchain};
pub use format::{CropRect, FrameShape, PixelFormat, Size};
pub use metrics::TranscodeReport;
pub use pipe::{Direction, ProcessPipe};
pub use probe::{probe, probe_stream, MediaInfo};
pub use sink::{FrameSink, SinkConfig};
pub use source::{FrameSource, SourceConfig};
pub use transcode::{transcode, transcode_limit};
