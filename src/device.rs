//! GPU (NVIDIA) backend selection
//!
//! ## Backends
//!
//! - **Software**: CPU decode/encode, crop/scale in the ffmpeg filter graph
//! - **Device**: cuvid decoder / nvenc encoder on one GPU, crop/scale done by
//!   the hardware decoder
//!
//! The number of GPUs is discovered once by asking nvenc to list devices and
//! is cached for the life of the [`DeviceRegistry`]. A device attached after
//! the first query is not seen.

use regex::Regex;
use std::fmt;
use std::sync::{LazyLock, OnceLock};
use tracing::{info, warn};

use crate::error::{MediaError, Result};
use crate::ffmpeg::Toolchain;

static GPU_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GPU #\d+ - < ").expect("static gpu pattern"));

/// Codec backend a source or sink runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Software,
    /// GPU index; taken modulo the number of devices at construction.
    Device { index: u32 },
}

impl Backend {
    pub fn device(index: u32) -> Self {
        Backend::Device { index }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Backend::Device { .. })
    }

    /// Resolve the requested GPU index against the available devices.
    pub fn resolve(self, registry: &DeviceRegistry) -> Result<Self> {
        match self {
            Backend::Software => Ok(self),
            Backend::Device { index } => Ok(Backend::Device {
                index: registry.select(index)?,
            }),
        }
    }
}

type CountFn = Box<dyn Fn() -> usize + Send + Sync>;

/// Memoized GPU count. Computed on first access, never invalidated.
pub struct DeviceRegistry {
    count: OnceLock<usize>,
    discover: CountFn,
}

impl DeviceRegistry {
    pub fn new(discover: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        Self {
            count: OnceLock::new(),
            discover: Box::new(discover),
        }
    }

    /// Registry that asks ffmpeg's nvenc for its device list.
    pub fn nvidia(tools: Toolchain) -> Self {
        Self::new(move || discover_nvidia(&tools))
    }

    /// Registry with a known device count.
    pub fn fixed(count: usize) -> Self {
        Self::new(move || count)
    }

    /// Process-wide registry using the default toolchain.
    pub fn global() -> &'static DeviceRegistry {
        static GLOBAL: LazyLock<DeviceRegistry> =
            LazyLock::new(|| DeviceRegistry::nvidia(Toolchain::default()));
        &GLOBAL
    }

    pub fn count(&self) -> usize {
        *self.count.get_or_init(|| (self.discover)())
    }

    /// Map a requested index onto an existing device.
    pub fn select(&self, requested: u32) -> Result<u32> {
        let count = self.count();
        if count == 0 {
            return Err(MediaError::NoDeviceFound);
        }
        Ok((requested as usize % count) as u32)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("count", &self.count.get())
            .finish()
    }
}

fn discover_nvidia(tools: &Toolchain) -> usize {
    info!("🔧 Getting number of NVIDIA GPUs...");
    let cmd = tools
        .ffmpeg_command()
        .args(["-f", "lavfi", "-i", "nullsrc", "-c:v", "h264_nvenc", "-gpu", "list", "-f", "null", "-"]);
    match cmd.capture() {
        Ok(report) => {
            let count = count_devices(&report);
            info!("   found {} NVIDIA GPU(s)", count);
            count
        }
        Err(e) => {
            warn!("⚠️  GPU discovery failed: {}", e);
            0
        }
    }
}

/// Count `GPU #N - < ... >` lines in nvenc's device listing.
pub fn count_devices(report: &str) -> usize {
    GPU_LINE_RE.find_iter(report).count()
}

/// Hardware decoder name for a probed codec.
pub fn decoder_for(codec: &str) -> Result<&'static str> {
    let name = match codec {
        "av1" => "av1_cuvid",
        "h264" | "x264" => "h264_cuvid",
        "hevc" | "x265" | "h265" => "hevc_cuvid",
        "mjpeg" => "mjpeg_cuvid",
        "mpeg1video" => "mpeg1_cuvid",
        "mpeg2video" => "mpeg2_cuvid",
        "mpeg4" => "mpeg4_cuvid",
        "vp1" => "vp1_cuvid",
        "vp8" => "vp8_cuvid",
        "vp9" => "vp9_cuvid",
        other => return Err(MediaError::UnsupportedCodec(other.to_string())),
    };
    Ok(name)
}

/// Hardware encoder name for a requested codec. Unknown names get `_nvenc` appended.
pub fn encoder_for(codec: &str) -> String {
    match codec {
        "" | "h264" | "x264" => "h264_nvenc".to_string(),
        "hevc" | "x265" | "h265" => "hevc_nvenc".to_string(),
        other => format!("{}_nvenc", other),
    }
}
