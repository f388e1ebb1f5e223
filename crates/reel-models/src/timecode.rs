//! `HH:MM:SS` time codec.
//!
//! Part boundaries are stored as whole-second `HH:MM:SS` strings and the final
//! render duration is reported back in the same shape. Hours are unbounded,
//! minutes and seconds must be in `0..=59`.

use thiserror::Error;

/// Time string parsing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimecodeError {
    /// Not three `:`-separated runs of digits.
    #[error("Invalid time format: '{0}'")]
    InvalidFormat(String),

    /// Minutes or seconds outside `0..=59`.
    #[error("Invalid time format: {field} out of range in '{value}'")]
    OutOfRange { field: &'static str, value: String },
}

/// Parse an `HH:MM:SS` string into seconds.
///
/// Fields do not have to be zero-padded (`"1:2:3"` is accepted), but each one
/// must be a non-empty run of ASCII digits.
///
/// # Examples
/// ```
/// use reel_models::timecode::parse_hms;
/// assert_eq!(parse_hms("01:30:05").unwrap(), 5405.0);
/// assert!(parse_hms("25:99:00").is_err());
/// ```
pub fn parse_hms(value: &str) -> Result<f64, TimecodeError> {
    let fields: Vec<&str> = value.split(':').collect();
    if fields.len() != 3 {
        return Err(TimecodeError::InvalidFormat(value.to_string()));
    }

    let hours = parse_field(fields[0], value)?;
    let minutes = parse_field(fields[1], value)?;
    let seconds = parse_field(fields[2], value)?;

    if minutes > 59 {
        return Err(TimecodeError::OutOfRange {
            field: "minutes",
            value: value.to_string(),
        });
    }
    if seconds > 59 {
        return Err(TimecodeError::OutOfRange {
            field: "seconds",
            value: value.to_string(),
        });
    }

    let total = hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60 + seconds))
        .ok_or_else(|| TimecodeError::OutOfRange {
            field: "hours",
            value: value.to_string(),
        })?;
    Ok(total as f64)
}

fn parse_field(field: &str, whole: &str) -> Result<u64, TimecodeError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimecodeError::InvalidFormat(whole.to_string()));
    }
    field
        .parse()
        .map_err(|_| TimecodeError::InvalidFormat(whole.to_string()))
}

/// Format seconds as `HH:MM:SS`.
///
/// Fractional seconds are truncated, never rounded. Hours are not wrapped at
/// 24. Negative and non-finite input formats as `00:00:00`.
pub fn format_hms(total_seconds: f64) -> String {
    let total = if total_seconds.is_finite() && total_seconds > 0.0 {
        total_seconds.trunc() as u64
    } else {
        0
    };

    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
