//! Source → sink frame forwarding

use tracing::{info, warn};

use crate::error::{MediaError, Result};
use crate::metrics::{Timer, TranscodeReport};
use crate::sink::FrameSink;
use crate::source::FrameSource;

/// Forward every frame from `source` into `sink` until the source ends.
///
/// Frames pass through the source's scratch buffer, so each one is written
/// before the next read overwrites it. Neither end is closed here.
pub fn transcode(source: &mut FrameSource, sink: &mut FrameSink) -> Result<TranscodeReport> {
    transcode_limit(source, sink, None)
}

/// Like [`transcode`], stopping after `max_frames` when given.
pub fn transcode_limit(
    source: &mut FrameSource,
    sink: &mut FrameSink,
    max_frames: Option<u64>,
) -> Result<TranscodeReport> {
    if source.bytes_per_frame() != sink.bytes_per_frame() {
        return Err(MediaError::ShapeMismatch {
            source_bytes: source.bytes_per_frame(),
            sink_bytes: sink.bytes_per_frame(),
        });
    }

    let timer = Timer::new();
    let mut report = TranscodeReport::default();

    while max_frames.map_or(true, |max| report.frames < max) {
        let Some(frame) = source.read_frame() else {
            break;
        };
        if !sink.write(frame)? {
            warn!("{}: sink rejected frame {}, stopping", sink.target(), report.frames);
            break;
        }
        report.record_frame(frame.len());
    }

    report.elapsed_ms = timer.elapsed_ms();
    info!(
        "✅ {} → {}: {} frames in {}ms ({:.1} fps)",
        source.source(),
        sink.target(),
        report.frames,
        report.elapsed_ms,
        report.fps()
    );
    Ok(report)
}
