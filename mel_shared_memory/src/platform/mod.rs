//! Platform-specific file, mapping and process helpers.

pub mod linux;

pub use linux::{SegmentPaths, get_current_pid, map_segment, open_segment_file};
