// framepipe - probe, read and transcode video through an ffmpeg pipe

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framepipe::{
    transcode_limit, Backend, CropRect, DeviceRegistry, FrameSink, FrameSource, PixelFormat,
    SinkConfig, Size, SourceConfig, Toolchain,
};

#[derive(Parser)]
#[command(name = "framepipe", version, about = "Raw video frames through an ffmpeg pipe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stream metadata as JSON
    Probe {
        source: String,
        /// Treat the source as a live stream
        #[arg(long)]
        live: bool,
        /// Stream analysis budget in milliseconds
        #[arg(long, default_value_t = 100)]
        analyze_ms: u64,
    },
    /// Report tool availability and the number of NVIDIA GPUs visible to ffmpeg
    Devices,
    /// Decode every frame and report the count
    Read {
        source: String,
        #[command(flatten)]
        decode: DecodeArgs,
    },
    /// Decode, optionally crop/resize, and re-encode
    Transcode {
        source: String,
        target: String,
        #[command(flatten)]
        decode: DecodeArgs,
        /// Encoder (h264, hevc, ...)
        #[arg(long, default_value = "h264")]
        codec: String,
        /// Encode on the GPU as well
        #[arg(long)]
        gpu_encode: bool,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
    },
}

#[derive(Args)]
struct DecodeArgs {
    /// Pixel format on the pipe
    #[arg(long, default_value = "bgr24")]
    pix_fmt: PixelFormat,
    /// Crop rectangle as x,y,w,h
    #[arg(long)]
    crop: Option<CropRect>,
    /// Resize target as WxH
    #[arg(long)]
    resize: Option<Size>,
    /// Decode on this GPU
    #[arg(long)]
    gpu: Option<u32>,
    /// Treat the source as a live stream
    #[arg(long)]
    live: bool,
}

impl DecodeArgs {
    fn config(&self, tools: &Toolchain) -> SourceConfig {
        SourceConfig {
            pix_fmt: self.pix_fmt,
            crop: self.crop.unwrap_or_default(),
            resize: self.resize.unwrap_or_default(),
            backend: self.gpu.map(Backend::device).unwrap_or_default(),
            live: self.live,
            tools: tools.clone(),
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();
    let tools = Toolchain::from_env();

    match cli.command {
        Commands::Probe { source, live, analyze_ms } => {
            let probed = if live {
                framepipe::probe_stream(&source, &tools, Duration::from_millis(analyze_ms))
            } else {
                framepipe::probe(&source, &tools)
            };
            let info = probed.with_context(|| format!("Failed to probe {}", source))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Devices => {
            let ffmpeg = tools.ffmpeg_available();
            let ffprobe = tools.ffprobe_available();
            let registry = DeviceRegistry::nvidia(tools);
            let report = serde_json::json!({
                "ffmpeg": ffmpeg,
                "ffprobe": ffprobe,
                "gpus": registry.count(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Read { source, decode } => {
            let mut cap = FrameSource::open(&*source, decode.config(&tools))
                .with_context(|| format!("Failed to open {}", source))?;
            info!(
                "{} {} @ {:.3} fps, {} frames, {:.2}s",
                cap.codec(),
                cap.size(),
                cap.fps(),
                cap.len(),
                cap.duration()
            );
            while cap.read_frame().is_some() {}
            println!("{}", cap.frames_read());
        }
        Commands::Transcode {
            source,
            target,
            decode,
            codec,
            gpu_encode,
            max_frames,
        } => {
            let mut cap = FrameSource::open(&*source, decode.config(&tools))
                .with_context(|| format!("Failed to open {}", source))?;

            let backend = match (gpu_encode, decode.gpu) {
                (true, gpu) => Backend::device(gpu.unwrap_or(0)),
                (false, _) => Backend::Software,
            };
            if backend.is_device() || cap.backend().is_device() {
                info!("🔧 GPU path: decode {:?}, encode {:?}", cap.backend(), backend);
            }
            let mut writer = FrameSink::create(
                &*target,
                SinkConfig {
                    codec,
                    fps: cap.fps(),
                    size: cap.size(),
                    pix_fmt: cap.pix_fmt(),
                    backend,
                    tools,
                    ..Default::default()
                },
            )
            .with_context(|| format!("Failed to create writer for {}", target))?;

            let report = transcode_limit(&mut cap, &mut writer, max_frames)?;
            cap.close();
            writer.close();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
