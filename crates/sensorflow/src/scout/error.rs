//! Error types for file discovery and reads.

use std::io;
use thiserror::Error;

/// Recoverable failure on one directory entry, archive, or file.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ScanError>;
