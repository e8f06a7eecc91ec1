//! Decoded frame source: ffmpeg decodes, we read raw frames off its stdout

use std::time::Duration;
use tracing::{debug, error, info};

use crate::device::{decoder_for, Backend, DeviceRegistry};
use crate::error::{MediaError, Result};
use crate::ffmpeg::{FfmpegCommand, Toolchain};
use crate::filter::{plan_device, plan_software};
use crate::format::{CropRect, FrameShape, PixelFormat, Size};
use crate::pipe::{Direction, ProcessPipe};
use crate::probe::{probe, probe_stream, rtsp_input_args, MediaInfo, DEFAULT_ANALYZE_DURATION};

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub pix_fmt: PixelFormat,
    /// All zeros for no crop.
    pub crop: CropRect,
    /// `(0, 0)` for no resize.
    pub resize: Size,
    pub backend: Backend,
    /// Treat the source as a live/network stream.
    pub live: bool,
    pub analyze_duration: Duration,
    pub tools: Toolchain,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pix_fmt: PixelFormat::Bgr24,
            crop: CropRect::default(),
            resize: Size::default(),
            backend: Backend::Software,
            live: false,
            analyze_duration: DEFAULT_ANALYZE_DURATION,
            tools: Toolchain::default(),
        }
    }
}

/// Pulls fixed-size raw frames from an ffmpeg decode process.
///
/// The process is spawned on the first read. A short or empty read ends the
/// stream for good: clean EOF and a decoder crash look the same on the pipe.
pub struct FrameSource {
    source: String,
    info: MediaInfo,
    pix_fmt: PixelFormat,
    backend: Backend,
    cropped: Size,
    size: Size,
    shape: FrameShape,
    pipe: ProcessPipe,
    scratch: Option<Vec<u8>>,
    frames_read: u64,
}

impl FrameSource {
    /// Probe `source` and prepare the decode command.
    pub fn open(source: impl Into<String>, config: SourceConfig) -> Result<Self> {
        Self::open_with_registry(source, config, DeviceRegistry::global())
    }

    pub fn open_with_registry(
        source: impl Into<String>,
        config: SourceConfig,
        registry: &DeviceRegistry,
    ) -> Result<Self> {
        let source = source.into();
        let backend = config.backend.resolve(registry)?;
        let info = if config.live {
            probe_stream(&source, &config.tools, config.analyze_duration)?
        } else {
            probe(&source, &config.tools)?
        };
        Self::assemble(source, info, config, backend)
    }

    /// Build from already known metadata, skipping the probe.
    pub fn from_info(
        source: impl Into<String>,
        info: MediaInfo,
        config: SourceConfig,
        registry: &DeviceRegistry,
    ) -> Result<Self> {
        let backend = config.backend.resolve(registry)?;
        Self::assemble(source.into(), info, config, backend)
    }

    fn assemble(source: String, info: MediaInfo, config: SourceConfig, backend: Backend) -> Result<Self> {
        let origin = info.size();
        // 4:2:0 chroma planes are half size, odd dimensions break the plane math
        if !origin.is_even() {
            return Err(MediaError::OddDimension {
                width: origin.width,
                height: origin.height,
            });
        }

        let tools = &config.tools;
        let mut cmd = tools
            .ffmpeg_command()
            .args(["-y", "-loglevel", tools.loglevel.as_str()]);

        let (cropped, size, filter_graph) = match backend {
            Backend::Software => {
                let plan = plan_software(origin, config.pix_fmt, config.crop, config.resize)?;
                (plan.cropped, plan.output, plan.filter_graph)
            }
            Backend::Device { index } => {
                let decoder = decoder_for(&info.codec)?;
                let plan = plan_device(origin, config.pix_fmt, config.crop, config.resize)?;
                cmd = cmd
                    .args(["-hwaccel", "cuda", "-hwaccel_device"])
                    .arg(index.to_string())
                    .args(["-vcodec", decoder])
                    .args(plan.decoder_args);
                (plan.cropped, plan.output, plan.filter_graph)
            }
        };

        if config.live {
            cmd = cmd.args(rtsp_input_args(&source));
        }
        cmd = cmd.input(&source);
        if config.live {
            cmd = cmd.args(["-an", "-map", "0:v"]);
        }
        let cmd = cmd
            .args(["-f", "rawvideo"])
            .opt("-vf", &filter_graph)
            .args(["-pix_fmt", config.pix_fmt.as_str()])
            .output("pipe:");

        info!("🎬 decode command: {}", cmd);

        Ok(Self {
            source,
            info,
            pix_fmt: config.pix_fmt,
            backend,
            cropped,
            size,
            shape: FrameShape::new(size, config.pix_fmt),
            pipe: ProcessPipe::new(cmd, Direction::Read),
            scratch: None,
            frames_read: 0,
        })
    }

    /// Read the next frame into `frame`.
    ///
    /// `Ok(false)` means the stream is over (or the decoder never started);
    /// every later call returns `Ok(false)` without spawning anything.
    pub fn read(&mut self, frame: &mut [u8]) -> Result<bool> {
        let expected = self.bytes_per_frame();
        if frame.len() < expected {
            return Err(MediaError::BufferTooSmall {
                expected,
                actual: frame.len(),
            });
        }
        Ok(self.fill(&mut frame[..expected]))
    }

    /// Read the next frame into the internal scratch buffer.
    ///
    /// The slice is overwritten by the next read; copy it out to keep it.
    pub fn read_frame(&mut self) -> Option<&[u8]> {
        if self.pipe.is_closed() {
            return None;
        }
        let mut scratch = self
            .scratch
            .take()
            .unwrap_or_else(|| vec![0; self.bytes_per_frame()]);
        if self.fill(&mut scratch) {
            self.scratch = Some(scratch);
            self.scratch.as_deref()
        } else {
            None
        }
    }

    /// Internally owned buffer of exactly one frame, allocated on first use.
    pub fn scratch_buffer(&mut self) -> &mut [u8] {
        let bytes = self.bytes_per_frame();
        self.scratch.get_or_insert_with(|| vec![0; bytes])
    }

    fn fill(&mut self, frame: &mut [u8]) -> bool {
        if let Err(e) = self.pipe.ensure_started() {
            if !matches!(e, MediaError::PipeClosed) {
                error!("❌ failed to start decoder for {}: {}", self.source, e);
            }
            self.close();
            return false;
        }

        let got = self.pipe.read_exact(frame);
        if got == frame.len() {
            self.frames_read += 1;
            true
        } else {
            debug!(
                "{}: stream ended after {} frames ({} trailing bytes)",
                self.source, self.frames_read, got
            );
            self.close();
            false
        }
    }

    /// Stop the decoder and free the scratch buffer. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.pipe.terminate();
        self.scratch = None;
    }

    /// True until the stream ends or is closed, including before the first read.
    pub fn is_open(&self) -> bool {
        !self.pipe.is_closed()
    }

    pub fn is_started(&self) -> bool {
        self.pipe.is_started()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn codec(&self) -> &str {
        &self.info.codec
    }

    pub fn fps(&self) -> f64 {
        self.info.fps
    }

    pub fn duration(&self) -> f64 {
        self.info.duration
    }

    /// Frame count reported by the probe (zero when unknown).
    pub fn len(&self) -> u64 {
        self.info.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.info.frame_count == 0
    }

    pub fn origin_size(&self) -> Size {
        self.info.size()
    }

    pub fn cropped_size(&self) -> Size {
        self.cropped
    }

    /// Size of the frames coming out of the pipe.
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn pix_fmt(&self) -> PixelFormat {
        self.pix_fmt
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.shape.bytes()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn command(&self) -> &FfmpegCommand {
        self.pipe.command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vga_info(codec: &str) -> MediaInfo {
        MediaInfo {
            codec: codec.to_string(),
            duration: 10.0,
            fps: 30.0,
            width: 640,
            height: 480,
            frame_count: 300,
            index_unreliable: false,
        }
    }

    fn config(pix_fmt: PixelFormat) -> SourceConfig {
        SourceConfig {
            pix_fmt,
            tools: Toolchain::from_env().with_ffmpeg("ffmpeg"),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_bgr_source() {
        let src = FrameSource::from_info("in.mp4", vga_info("h264"), config(PixelFormat::Bgr24), &DeviceRegistry::fixed(0)).unwrap();
        assert_eq!(src.size(), Size::new(640, 480));
        assert_eq!(src.bytes_per_frame(), 921_600);
        assert_eq!(src.len(), 300);
        assert!(src.is_open());
        assert!(!src.is_started());
        assert!(!src.command().get_args().iter().any(|a| a == "-vf"));
        assert!(src.command().contains(&["-i", "in.mp4", "-f", "rawvideo", "-pix_fmt", "bgr24", "pipe:"]));
    }

    #[test]
    fn test_cropped_source() {
        let cfg = SourceConfig {
            crop: CropRect::new(100, 100, 500, 300),
            ..config(PixelFormat::Bgr24)
        };
        let src = FrameSource::from_info("in.mp4", vga_info("h264"), cfg, &DeviceRegistry::fixed(0)).unwrap();
        assert_eq!(src.cropped_size(), Size::new(500, 300));
        assert_eq!(src.bytes_per_frame(), 450_000);
        assert!(src.command().contains(&["-vf", "crop=500:300:100:100"]));
    }

    #[test]
    fn test_resized_gray_source() {
        let cfg = SourceConfig {
            resize: Size::new(500, 300),
            ..config(PixelFormat::Gray)
        };
        let src = FrameSource::from_info("in.mp4", vga_info("h264"), cfg, &DeviceRegistry::fixed(0)).unwrap();
        assert_eq!(src.size(), Size::new(500, 300));
        assert_eq!(src.bytes_per_frame(), 150_000);
        assert!(src.command().contains(&["-vf", "scale=500x300,extractplanes=y"]));
    }

    #[test]
    fn test_odd_origin_rejected() {
        let info = MediaInfo { width: 641, ..vga_info("h264") };
        let err = FrameSource::from_info("in.mp4", info, config(PixelFormat::Bgr24), &DeviceRegistry::fixed(0));
        assert!(matches!(err, Err(MediaError::OddDimension { width: 641, height: 480 })));
    }

    #[test]
    fn test_device_source_command() {
        let cfg = SourceConfig {
            backend: Backend::device(3),
            crop: CropRect::new(100, 100, 500, 300),
            ..config(PixelFormat::Yuv420p)
        };
        let src = FrameSource::from_info("in.mp4", vga_info("h264"), cfg, &DeviceRegistry::fixed(2)).unwrap();
        assert_eq!(src.backend(), Backend::Device { index: 1 });
        assert_eq!(src.bytes_per_frame(), 500 * 300 * 3 / 2);
        assert!(src.command().contains(&[
            "-hwaccel", "cuda", "-hwaccel_device", "1", "-vcodec", "h264_cuvid", "-crop", "100x80x100x40", "-i", "in.mp4"
        ]));
        assert!(!src.command().get_args().iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_device_source_without_gpu() {
        let cfg = SourceConfig {
            backend: Backend::device(0),
            ..config(PixelFormat::Bgr24)
        };
        let err = FrameSource::from_info("in.mp4", vga_info("h264"), cfg, &DeviceRegistry::fixed(0));
        assert!(matches!(err, Err(MediaError::NoDeviceFound)));
    }

    #[test]
    fn test_device_source_unsupported_codec() {
        let cfg = SourceConfig {
            backend: Backend::device(0),
            ..config(PixelFormat::Bgr24)
        };
        let err = FrameSource::from_info("in.mov", vga_info("prores"), cfg, &DeviceRegistry::fixed(1));
        assert!(matches!(err, Err(MediaError::UnsupportedCodec(_))));
    }

    #[test]
    fn test_live_rtsp_command() {
        let cfg = SourceConfig {
            live: true,
            ..config(PixelFormat::Bgr24)
        };
        let src = FrameSource::from_info("rtsp://cam/1", vga_info("h264"), cfg, &DeviceRegistry::fixed(0)).unwrap();
        assert!(src.command().contains(&[
            "-rtsp_flags", "prefer_tcp", "-pkt_size", "736", "-i", "rtsp://cam/1", "-an", "-map", "0:v"
        ]));
    }

    #[test]
    fn test_buffer_too_small() {
        let mut src = FrameSource::from_info("in.mp4", vga_info("h264"), config(PixelFormat::Gray), &DeviceRegistry::fixed(0)).unwrap();
        let mut buf = vec![0u8; 100];
        assert!(matches!(
            src.read(&mut buf),
            Err(MediaError::BufferTooSmall { expected: 307_200, actual: 100 })
        ));
        assert!(!src.is_started());
    }

    #[test]
    fn test_scratch_buffer_reused() {
        let mut src = FrameSource::from_info("in.mp4", vga_info("h264"), config(PixelFormat::Gray), &DeviceRegistry::fixed(0)).unwrap();
        let first = src.scratch_buffer().as_ptr();
        assert_eq!(src.scratch_buffer().len(), 307_200);
        assert_eq!(src.scratch_buffer().as_ptr(), first);
    }

    #[test]
    fn test_close_twice() {
        let mut src = FrameSource::from_info("in.mp4", vga_info("h264"), config(PixelFormat::Bgr24), &DeviceRegistry::fixed(0)).unwrap();
        src.close();
        src.close();
        assert!(!src.is_open());
        let mut buf = vec![0u8; src.bytes_per_frame()];
        assert!(!src.read(&mut buf).unwrap());
    }

    #[test]
    fn test_read_frame_after_close_allocates_nothing() {
        let mut src = FrameSource::from_info("in.mp4", vga_info("h264"), config(PixelFormat::Gray), &DeviceRegistry::fixed(0)).unwrap();
        src.scratch_buffer();
        src.close();
        assert!(src.scratch.is_none());
        assert!(src.read_frame().is_none());
        assert!(src.read_frame().is_none());
        assert!(src.scratch.is_none());
        assert!(!src.is_started());
    }
}
