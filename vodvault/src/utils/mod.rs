//! Utility modules.

pub mod fs;
pub mod json_append;

pub use json_append::{JsonArrayAppender, append_json_record_sync, read_json_array};
