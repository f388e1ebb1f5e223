//! Output naming helpers.

use regex::Regex;
use std::sync::LazyLock;

use crate::VideoId;

static UNSAFE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Reduce a title to `[A-Za-z0-9_]`, collapsing every unsafe run to one `_`.
///
/// Returns `"video"` when nothing usable is left.
pub fn safe_filename(title: &str) -> String {
    let replaced = UNSAFE_RUN.replace_all(title, "_");
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Encode a video id as a path component, keeping distinct ids distinct.
///
/// ASCII alphanumerics pass through; every other byte becomes `-` plus two
/// lowercase hex digits. The result never contains `_` or `/`, and an empty
/// id maps to a lone `-`.
pub fn id_file_key(video_id: &VideoId) -> String {
    let id = video_id.as_str();
    if id.is_empty() {
        return "-".to_string();
    }
    let mut key = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() {
            key.push(byte as char);
        } else {
            key.push_str(&format!("-{:02x}", byte));
        }
    }
    key
}

/// Output file name for a video: `<safe title>_<id key>.mp4`.
///
/// The id key holds no `_`, so the last `_` always splits title from id and
/// two records never share a file, while re-rendering one record always
/// targets the same name.
pub fn output_file_name(title: &str, video_id: &VideoId) -> String {
    format!("{}_{}.mp4", safe_filename(title), id_file_key(video_id))
}
