//! Encoded frame sink: we write raw frames to ffmpeg's stdin

use tracing::{error, info, warn};

use crate::device::{encoder_for, Backend, DeviceRegistry};
use crate::error::{MediaError, Result};
use crate::ffmpeg::{FfmpegCommand, Toolchain};
use crate::format::{FrameShape, PixelFormat, Size};
use crate::pipe::{Direction, ProcessPipe};
use crate::probe::is_rtsp;

/// Pixel format handed to the encoder, whatever the raw input is.
pub const ENCODER_PIX_FMT: &str = "yuv420p";

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Encoder name; empty means h264.
    pub codec: String,
    pub fps: f64,
    pub size: Size,
    /// Layout of the frames we write.
    pub pix_fmt: PixelFormat,
    /// Extra output options placed before the target, e.g. `["-crf", "23"]`.
    pub output_args: Vec<String>,
    pub backend: Backend,
    pub tools: Toolchain,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            fps: 30.0,
            size: Size::default(),
            pix_fmt: PixelFormat::Bgr24,
            output_args: Vec::new(),
            backend: Backend::Software,
            tools: Toolchain::default(),
        }
    }
}

/// Pushes fixed-size raw frames into an ffmpeg encode process.
pub struct FrameSink {
    target: String,
    codec: String,
    fps: f64,
    size: Size,
    pix_fmt: PixelFormat,
    backend: Backend,
    shape: FrameShape,
    pipe: ProcessPipe,
    frames_written: u64,
}

impl FrameSink {
    pub fn create(target: impl Into<String>, config: SinkConfig) -> Result<Self> {
        Self::create_with_registry(target, config, DeviceRegistry::global())
    }

    pub fn create_with_registry(
        target: impl Into<String>,
        config: SinkConfig,
        registry: &DeviceRegistry,
    ) -> Result<Self> {
        let target = target.into();
        let backend = config.backend.resolve(registry)?;

        let size = config.size;
        if size.is_empty() {
            return Err(MediaError::EmptyFrameSize);
        }
        if config.pix_fmt.is_chroma_subsampled() && !size.is_even() {
            return Err(MediaError::OddDimension {
                width: size.width,
                height: size.height,
            });
        }

        let codec = if config.codec.is_empty() {
            "h264".to_string()
        } else {
            config.codec.clone()
        };

        let tools = &config.tools;
        let mut cmd = tools
            .ffmpeg_command()
            .args(["-y", "-loglevel", tools.loglevel.as_str()])
            .args(["-f", "rawvideo", "-pix_fmt", config.pix_fmt.as_str()])
            .arg("-s")
            .arg(size.to_string())
            .arg("-r")
            .arg(config.fps.to_string())
            .input("pipe:");

        cmd = match backend {
            Backend::Software => cmd.args(["-c:v", codec.as_str()]),
            Backend::Device { index } => cmd
                .args(["-c:v".to_string(), encoder_for(&codec)])
                .arg("-gpu")
                .arg(index.to_string()),
        };

        cmd = cmd
            .args(["-pix_fmt", ENCODER_PIX_FMT])
            .args(config.output_args.iter().cloned());
        if is_rtsp(&target) {
            cmd = cmd.args(["-f", "rtsp", "-rtsp_transport", "tcp"]);
        }
        let cmd = cmd.output(&target);

        info!("🎬 encode command: {}", cmd);

        Ok(Self {
            target,
            codec,
            fps: config.fps,
            size,
            pix_fmt: config.pix_fmt,
            backend,
            shape: FrameShape::new(size, config.pix_fmt),
            pipe: ProcessPipe::new(cmd, Direction::Write),
            frames_written: 0,
        })
    }

    /// Write one frame.
    ///
    /// An empty frame is rejected without starting the encoder. `Ok(false)`
    /// means the encoder could not be started or has gone away.
    pub fn write(&mut self, frame: &[u8]) -> Result<bool> {
        if frame.is_empty() {
            return Ok(false);
        }
        let expected = self.bytes_per_frame();
        if frame.len() < expected {
            return Err(MediaError::BufferTooSmall {
                expected,
                actual: frame.len(),
            });
        }

        if let Err(e) = self.pipe.ensure_started() {
            if !matches!(e, MediaError::PipeClosed) {
                error!("❌ Failed to open video writer for {}: {}", self.target, e);
            }
            return Ok(false);
        }

        if let Err(e) = self.pipe.write_all(&frame[..expected]) {
            warn!("{}: encoder stopped accepting frames: {}", self.target, e);
            self.pipe.terminate();
            return Ok(false);
        }
        self.frames_written += 1;
        Ok(true)
    }

    /// Close stdin and wait for the encoder to finish. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.pipe.terminate();
    }

    /// True until closed, including before the first frame is written.
    pub fn is_open(&self) -> bool {
        !self.pipe.is_closed()
    }

    pub fn is_started(&self) -> bool {
        self.pipe.is_started()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn size(&self) -> Size {
        self.size
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

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn command(&self) -> &FfmpegCommand {
        self.pipe.command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: Size, pix_fmt: PixelFormat) -> SinkConfig {
        SinkConfig {
            size,
            pix_fmt,
            fps: 25.0,
            tools: Toolchain::from_env().with_ffmpeg("ffmpeg"),
            ..Default::default()
        }
    }

    #[test]
    fn test_software_encode_command() {
        let cfg = SinkConfig {
            output_args: vec!["-crf".to_string(), "23".to_string()],
            ..config(Size::new(640, 480), PixelFormat::Bgr24)
        };
        let sink = FrameSink::create_with_registry("out.mp4", cfg, &DeviceRegistry::fixed(0)).unwrap();
        assert_eq!(sink.bytes_per_frame(), 921_600);
        assert!(sink.command().contains(&[
            "-f", "rawvideo", "-pix_fmt", "bgr24", "-s", "640x480", "-r", "25", "-i", "pipe:",
            "-c:v", "h264", "-pix_fmt", "yuv420p", "-crf", "23", "out.mp4"
        ]));
        assert!(sink.is_open());
        assert!(!sink.is_started());
    }

    #[test]
    fn test_device_encode_command() {
        let cfg = SinkConfig {
            codec: "hevc".to_string(),
            backend: Backend::device(5),
            ..config(Size::new(640, 480), PixelFormat::Yuv420p)
        };
        let sink = FrameSink::create_with_registry("out.mp4", cfg, &DeviceRegistry::fixed(4)).unwrap();
        assert_eq!(sink.backend(), Backend::Device { index: 1 });
        assert!(sink.command().contains(&["-c:v", "hevc_nvenc", "-gpu", "1", "-pix_fmt", "yuv420p"]));
    }

    #[test]
    fn test_device_sink_without_gpu() {
        let cfg = SinkConfig {
            backend: Backend::device(0),
            ..config(Size::new(640, 480), PixelFormat::Bgr24)
        };
        assert!(matches!(
            FrameSink::create_with_registry("out.mp4", cfg, &DeviceRegistry::fixed(0)),
            Err(MediaError::NoDeviceFound)
        ));
    }

    #[test]
    fn test_rtsp_target_forces_tcp() {
        let sink = FrameSink::create_with_registry(
            "rtsp://server/live",
            config(Size::new(320, 240), PixelFormat::Gray),
            &DeviceRegistry::fixed(0),
        )
        .unwrap();
        assert!(sink.command().contains(&["-f", "rtsp", "-rtsp_transport", "tcp", "rtsp://server/live"]));
        assert_eq!(sink.bytes_per_frame(), 320 * 240);
    }

    #[test]
    fn test_empty_codec_defaults_to_h264() {
        let cfg = SinkConfig {
            codec: String::new(),
            ..config(Size::new(2, 2), PixelFormat::Gray)
        };
        let sink = FrameSink::create_with_registry("out.mp4", cfg, &DeviceRegistry::fixed(0)).unwrap();
        assert_eq!(sink.codec(), "h264");
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(matches!(
            FrameSink::create_with_registry("o.mp4", config(Size::new(0, 480), PixelFormat::Bgr24), &DeviceRegistry::fixed(0)),
            Err(MediaError::EmptyFrameSize)
        ));
        assert!(matches!(
            FrameSink::create_with_registry("o.mp4", config(Size::new(641, 480), PixelFormat::Nv12), &DeviceRegistry::fixed(0)),
            Err(MediaError::OddDimension { .. })
        ));
        assert!(FrameSink::create_with_registry("o.mp4", config(Size::new(641, 480), PixelFormat::Bgr24), &DeviceRegistry::fixed(0)).is_ok());
    }

    #[test]
    fn test_empty_frame_does_not_start() {
        let mut sink = FrameSink::create_with_registry("out.mp4", config(Size::new(4, 2), PixelFormat::Gray), &DeviceRegistry::fixed(0)).unwrap();
        assert!(!sink.write(&[]).unwrap());
        assert!(!sink.is_started());
        assert!(sink.is_open());
        assert!(matches!(sink.write(&[0u8; 3]), Err(MediaError::BufferTooSmall { expected: 8, actual: 3 })));
        assert!(!sink.is_started());
    }

    #[test]
    fn test_spawn_failure_reports_false() {
        let cfg = SinkConfig {
            tools: Toolchain::from_env().with_ffmpeg("/nonexistent/ffmpeg-12345"),
            ..config(Size::new(4, 2), PixelFormat::Gray)
        };
        let mut sink = FrameSink::create_with_registry("out.mp4", cfg, &DeviceRegistry::fixed(0)).unwrap();
        assert!(!sink.write(&[0u8; 8]).unwrap());
        assert!(!sink.is_open());
        assert_eq!(sink.frames_written(), 0);
        sink.close();
        sink.close();
    }
}
