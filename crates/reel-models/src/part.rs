//! Video parts and their validation into render specs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::timecode::parse_hms;
use crate::VideoId;

/// A stored part of a video, as written by the API layer.
///
/// Every render field is optional here because the record is loosely
/// populated; [`validate_parts`] is the single place that turns it into a
/// strongly typed [`PartSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoPart {
    /// Unique part ID
    pub video_parts_id: String,
    /// Owning video
    pub video_id: VideoId,
    /// Source media location
    #[serde(default)]
    pub file_location: Option<String>,
    /// Start of the range, `HH:MM:SS`
    #[serde(default)]
    pub start_time: Option<String>,
    /// End of the range, `HH:MM:SS`
    #[serde(default)]
    pub end_time: Option<String>,
    /// Position in the final video
    #[serde(default)]
    pub part_number: Option<u32>,
}

impl VideoPart {
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.file_location) {
            missing.push("file_location");
        }
        if is_blank(&self.start_time) {
            missing.push("start_time");
        }
        if is_blank(&self.end_time) {
            missing.push("end_time");
        }
        if self.part_number.is_none() {
            missing.push("part_number");
        }
        missing
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// One trimmed input clip of a render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PartSpec {
    /// Source media path
    pub source_path: PathBuf,
    /// Range start in seconds
    pub start_seconds: f64,
    /// Range end in seconds
    pub end_seconds: f64,
}

impl PartSpec {
    pub fn new(source_path: impl Into<PathBuf>, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            source_path: source_path.into(),
            start_seconds,
            end_seconds,
        }
    }

    /// Length of the requested range in seconds.
    pub fn duration(&self) -> f64 {
        (self.end_seconds - self.start_seconds).max(0.0)
    }
}

/// Structural problems found in a video's parts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartValidationError {
    #[error("No video parts found for video")]
    NoParts,

    #[error("Invalid video parts: {0}")]
    Invalid(String),
}

/// Order parts by `part_number` and convert them into render specs.
///
/// Problems are reported per part index (position after ordering) and joined
/// into one reason, so a record receives a single message describing every
/// broken part.
pub fn validate_parts(parts: &[VideoPart]) -> Result<Vec<PartSpec>, PartValidationError> {
    if parts.is_empty() {
        return Err(PartValidationError::NoParts);
    }

    let mut ordered: Vec<&VideoPart> = parts.iter().collect();
    // Parts without a number sort last; validation rejects them below anyway.
    ordered.sort_by_key(|p| (p.part_number.is_none(), p.part_number));

    let missing: Vec<String> = ordered
        .iter()
        .enumerate()
        .filter_map(|(index, part)| {
            let fields = part.missing_fields();
            (!fields.is_empty())
                .then(|| format!("part_index={} missing {}", index, fields.join(", ")))
        })
        .collect();
    if !missing.is_empty() {
        return Err(PartValidationError::Invalid(missing.join("; ")));
    }

    let mut specs = Vec::with_capacity(ordered.len());
    let mut invalid = Vec::new();
    for (index, part) in ordered.iter().enumerate() {
        // Presence was checked above.
        let location = part.file_location.as_deref().unwrap_or_default().trim();
        let start = part.start_time.as_deref().unwrap_or_default().trim();
        let end = part.end_time.as_deref().unwrap_or_default().trim();

        match (parse_hms(start), parse_hms(end)) {
            (Ok(start_seconds), Ok(end_seconds)) => {
                specs.push(PartSpec::new(location, start_seconds, end_seconds));
            }
            (start_result, end_result) => {
                if start_result.is_err() {
                    invalid.push(format!("part_index={} invalid start_time '{}'", index, start));
                }
                if end_result.is_err() {
                    invalid.push(format!("part_index={} invalid end_time '{}'", index, end));
                }
            }
        }
    }
    if !invalid.is_empty() {
        return Err(PartValidationError::Invalid(invalid.join("; ")));
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: &str, number: Option<u32>, location: &str, start: &str, end: &str) -> VideoPart {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        VideoPart {
            video_parts_id: id.to_string(),
            video_id: VideoId::from("v1"),
            file_location: opt(location),
            start_time: opt(start),
            end_time: opt(end),
            part_number: number,
        }
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert_eq!(validate_parts(&[]), Err(PartValidationError::NoParts));
        assert_eq!(
            PartValidationError::NoParts.to_string(),
            "No video parts found for video"
        );
    }

    #[test]
    fn test_parts_ordered_by_part_number() {
        let parts = vec![
            part("c", Some(3), "c.mp4", "00:00:02", "00:00:04"),
            part("a", Some(1), "a.mp4", "00:00:00", "00:00:05"),
            part("b", Some(2), "b.mp4", "00:00:05", "00:00:10"),
        ];

        let specs = validate_parts(&parts).unwrap();
        let sources: Vec<_> = specs.iter().map(|s| s.source_path.to_str().unwrap()).collect();
        assert_eq!(sources, vec!["a.mp4", "b.mp4", "c.mp4"]);
        assert_eq!(specs[0].start_seconds, 0.0);
        assert_eq!(specs[0].end_seconds, 5.0);
        assert_eq!(specs[2].duration(), 2.0);
    }

    #[test]
    fn test_part_number_zero_is_present() {
        let parts = vec![part("a", Some(0), "a.mp4", "00:00:00", "00:00:05")];
        assert!(validate_parts(&parts).is_ok());
    }

    #[test]
    fn test_missing_fields_reported_per_index() {
        let parts = vec![
            part("a", Some(1), "a.mp4", "00:00:00", "00:00:05"),
            part("b", Some(2), "", "", "00:00:10"),
            part("c", None, "c.mp4", "00:00:01", ""),
        ];

        let err = validate_parts(&parts).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid video parts: part_index=1 missing file_location, start_time; \
             part_index=2 missing end_time, part_number"
        );
    }

    #[test]
    fn test_whitespace_location_counts_as_missing() {
        let parts = vec![part("a", Some(1), "   ", "00:00:00", "00:00:05")];
        let err = validate_parts(&parts).unwrap_err();
        assert!(err.to_string().contains("part_index=0 missing file_location"));
    }

    #[test]
    fn test_bad_time_strings_rejected() {
        let parts = vec![
            part("a", Some(1), "a.mp4", "00:00:00", "00:00:05"),
            part("b", Some(2), "b.mp4", "not:a:time", "00:99:00"),
        ];

        let err = validate_parts(&parts).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid video parts: part_index=1 invalid start_time 'not:a:time'; \
             part_index=1 invalid end_time '00:99:00'"
        );
    }
}
