//! Media probing via ffprobe
//!
//! ffprobe is asked for a compact JSON report limited to the first video
//! stream. Fields are pulled out one by one with patterns rather than a full
//! parse: some containers omit fields, and a missing field just stays zero.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use regex::Regex;
use tracing::debug;

use crate::error::{MediaError, Result};
use crate::ffmpeg::{FfmpegError, Toolchain};
use crate::format::Size;

/// Containers whose header frame count cannot be trusted.
const INDEX_UNRELIABLE: &[&str] = &["mkv", "flv", "ts"];

/// Default time ffprobe may spend analysing a live stream.
pub const DEFAULT_ANALYZE_DURATION: Duration = Duration::from_millis(100);

static CODEC_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""codec_name"\s*:\s*"(\w+)""#));
static WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""width"\s*:\s*(\d+)"#));
static HEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""height"\s*:\s*(\d+)"#));
static FRAMES_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""nb_frames"\s*:\s*"(\d+)""#));
static PACKETS_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""nb_read_packets"\s*:\s*"(\d+)""#));
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""duration"\s*:\s*"([0-9]*\.?[0-9]+)""#));
static RATE_RE: LazyLock<Regex> = LazyLock::new(|| pattern(r#""r_frame_rate"\s*:\s*"(\d+)/(\d+)""#));

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static probe pattern")
}

/// Geometry and timing of the first video stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub codec: String,
    /// Seconds; zero for live sources.
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Best effort; zero when unknown.
    pub frame_count: u64,
    /// Frame count came from counting packets rather than the header.
    pub index_unreliable: bool,
}

impl MediaInfo {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Probe a file (or anything ffprobe opens directly).
pub fn probe(source: &str, tools: &Toolchain) -> Result<MediaInfo> {
    if !is_url(source) && !Path::new(source).exists() {
        return Err(MediaError::SourceUnavailable(format!("{}: file does not exist", source)));
    }

    let index_unreliable = is_index_unreliable(source);
    let mut cmd = tools
        .ffprobe_command()
        .args(["-v", "quiet", "-print_format", "json=compact=1", "-select_streams", "v:0"]);
    if index_unreliable {
        cmd = cmd.arg("-count_packets");
    }
    let cmd = cmd.arg("-show_streams").output(source);

    debug!("probe command: {}", cmd);
    let report = run_probe(source, cmd)?;
    require_video(source, parse_report(&report, index_unreliable))
}

/// Probe a live or network stream.
///
/// Analysis time is bounded and duration/frame count are left at zero.
pub fn probe_stream(source: &str, tools: &Toolchain, analyze: Duration) -> Result<MediaInfo> {
    let cmd = tools
        .ffprobe_command()
        .args(["-v", "quiet", "-print_format", "json=compact=1"])
        .args(rtsp_input_args(source))
        .arg("-analyzeduration")
        .arg(analyze.as_micros().to_string())
        .args(["-select_streams", "v:0", "-show_format", "-show_streams"])
        .output(source);

    debug!("stream probe command: {}", cmd);
    let report = run_probe(source, cmd)?;
    let info = parse_report(&report, false);
    require_video(
        source,
        MediaInfo {
            duration: 0.0,
            frame_count: 0,
            ..info
        },
    )
}

fn run_probe(source: &str, cmd: crate::ffmpeg::FfmpegCommand) -> Result<String> {
    match cmd.execute() {
        Ok(output) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        Err(FfmpegError::ExecutionFailed(msg)) => Err(MediaError::SourceUnavailable(format!(
            "{}: ffprobe failed {}",
            source, msg
        ))),
        Err(e) => Err(e.into()),
    }
}

fn require_video(source: &str, info: MediaInfo) -> Result<MediaInfo> {
    if info.size().is_empty() {
        return Err(MediaError::SourceUnavailable(format!("{}: no video stream", source)));
    }
    debug!(
        "probed {}: {} {}x{} @ {:.3} fps, {} frames",
        source, info.codec, info.width, info.height, info.fps, info.frame_count
    );
    Ok(info)
}

/// Extract the fields we care about from an ffprobe JSON report.
///
/// With `count_packets` the frame count is read from `nb_read_packets`
/// instead of `nb_frames`.
pub fn parse_report(report: &str, count_packets: bool) -> MediaInfo {
    let capture = |re: &Regex| -> Option<String> {
        re.captures(report)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    let count_re = if count_packets { &*PACKETS_RE } else { &*FRAMES_RE };

    let fps = RATE_RE
        .captures(report)
        .and_then(|c| {
            let num: f64 = c.get(1)?.as_str().parse().ok()?;
            let den: f64 = c.get(2)?.as_str().parse().ok()?;
            Some(if den == 0.0 { 0.0 } else { num / den })
        })
        .unwrap_or(0.0);

    MediaInfo {
        codec: capture(&CODEC_RE).unwrap_or_default(),
        duration: capture(&DURATION_RE).and_then(|s| s.parse().ok()).unwrap_or(0.0),
        fps,
        width: capture(&WIDTH_RE).and_then(|s| s.parse().ok()).unwrap_or(0),
        height: capture(&HEIGHT_RE).and_then(|s| s.parse().ok()).unwrap_or(0),
        frame_count: capture(count_re).and_then(|s| s.parse().ok()).unwrap_or(0),
        index_unreliable: count_packets,
    }
}

pub(crate) fn is_url(source: &str) -> bool {
    source.contains("://")
}

pub(crate) fn is_rtsp(source: &str) -> bool {
    source.starts_with("rtsp://")
}

/// Transport options for RTSP inputs: prefer TCP, bound the packet size.
pub(crate) fn rtsp_input_args(source: &str) -> Vec<&'static str> {
    if is_rtsp(source) {
        vec!["-rtsp_flags", "prefer_tcp", "-pkt_size", "736"]
    } else {
        Vec::new()
    }
}

fn is_index_unreliable(source: &str) -> bool {
    Path::new(source)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| INDEX_UNRELIABLE.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MP4_REPORT: &str = r#"{"streams": [{"index": 0,"codec_name": "h264","codec_type": "video","width": 640,"height": 480,"coded_width": 640,"coded_height": 480,"r_frame_rate": "30000/1001","avg_frame_rate": "30000/1001","duration": "10.010000","nb_frames": "300"}]}"#;

    const MKV_REPORT: &str = r#"{"streams": [{"codec_name": "hevc","width": 1920,"height": 1080,"r_frame_rate": "25/1","nb_read_packets": "1250"}]}"#;

    #[test]
    fn test_parse_mp4_report() {
        let info = parse_report(MP4_REPORT, false);
        assert_eq!(info.codec, "h264");
        assert_eq!(info.size(), Size::new(640, 480));
        assert_eq!(info.frame_count, 300);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!((info.duration - 10.01).abs() < 1e-9);
        assert!(!info.index_unreliable);
    }

    #[test]
    fn test_parse_counts_packets_for_unreliable_index() {
        let info = parse_report(MKV_REPORT, true);
        assert_eq!(info.codec, "hevc");
        assert_eq!(info.frame_count, 1250);
        assert_eq!(info.fps, 25.0);
        assert!(info.index_unreliable);

        // header count is ignored when counting packets
        assert_eq!(parse_report(MP4_REPORT, true).frame_count, 0);
    }

    #[test]
    fn test_missing_fields_default() {
        let info = parse_report(r#"{"streams": [{"r_frame_rate": "0/0"}]}"#, false);
        assert_eq!(info, MediaInfo::default());
        assert_eq!(parse_report("", false), MediaInfo::default());
    }

    #[test]
    fn test_index_unreliable_extensions() {
        assert!(is_index_unreliable("/videos/a.MKV"));
        assert!(is_index_unreliable("capture.ts"));
        assert!(!is_index_unreliable("clip.mp4"));
        assert!(!is_index_unreliable("noext"));
    }

    #[test]
    fn test_rtsp_transport_args() {
        assert_eq!(rtsp_input_args("rtsp://cam/1"), ["-rtsp_flags", "prefer_tcp", "-pkt_size", "736"]);
        assert!(rtsp_input_args("http://cam/1").is_empty());
    }

    #[test]
    fn test_probe_missing_file() {
        let err = probe("/nonexistent/file.mp4", &Toolchain::default()).unwrap_err();
        assert!(matches!(err, MediaError::SourceUnavailable(_)));
    }
}
