//! Metrics emitted by the rendering core.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FFMPEG_DURATION_SECONDS: &str = "reel_ffmpeg_duration_seconds";
    pub const SEGMENTS_RENDERED_TOTAL: &str = "reel_segments_rendered_total";
    pub const SEGMENTS_SKIPPED_TOTAL: &str = "reel_segments_skipped_total";
    pub const CONCAT_TOTAL: &str = "reel_concat_total";
}

/// Record the wall-clock time of one external tool invocation.
pub fn record_tool_duration(operation: &'static str, duration_secs: f64) {
    histogram!(names::FFMPEG_DURATION_SECONDS, "operation" => operation).record(duration_secs);
}

pub fn record_segment_rendered() {
    counter!(names::SEGMENTS_RENDERED_TOTAL).increment(1);
}

/// Record a part skipped by the lenient per-part policy.
pub fn record_segment_skipped(reason: &'static str) {
    counter!(names::SEGMENTS_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

/// Record which concat path produced the output (`fast`, `fallback`, `failed`).
pub fn record_concat(path: &'static str) {
    counter!(names::CONCAT_TOTAL, "path" => path).increment(1);
}
