//! Scout - sensor file discovery.
//!
//! Walks a root folder, looks inside ZIP archives, and yields one
//! [`FileMetadata`] per candidate CSV whose base name matches the configured
//! patterns. Problems with individual entries are reported as
//! [`ScanOutcome::Skipped`] and never stop the walk.

pub mod error;
pub mod patterns;
pub mod reader;
pub mod scanner;
pub mod types;

pub use error::ScanError;
pub use patterns::{normalize_name_pattern, NamePatterns};
pub use reader::read_file_bytes;
pub use scanner::{FileScanner, ScanOutcome, ScanSkip};
pub use types::FileMetadata;
