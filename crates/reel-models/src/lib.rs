//! Shared data models for the ReelMaker backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and their status state machine
//! - Video parts and the validated render job built from them
//! - `HH:MM:SS` time codec
//! - Output file naming

pub mod job;
pub mod part;
pub mod timecode;
pub mod utils;
pub mod video;

// Re-export common types
pub use job::{JobId, VideoJob};
pub use part::{validate_parts, PartSpec, PartValidationError, VideoPart};
pub use timecode::{format_hms, parse_hms, TimecodeError};
pub use utils::{id_file_key, output_file_name, safe_filename};
pub use video::{
    RecordField, StatusUpdate, TransitionError, VideoId, VideoRecord, VideoStatus,
};
