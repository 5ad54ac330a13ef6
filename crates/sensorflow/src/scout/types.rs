//! Core types for discovered files.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Separator between an archive's id and a member name in a source file id.
pub const ARCHIVE_MEMBER_SEPARATOR: &str = "!/";

/// A discovered candidate file, on disk or inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    /// On-disk location: the file itself, or the archive holding it
    pub path: PathBuf,
    /// Set when the file is an archive member (same as `path`)
    pub archive_origin: Option<PathBuf>,
    /// Member path inside the archive
    pub entry_name: Option<String>,
    /// Base name used for pattern and naming-convention matching
    pub inferred_name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Local modification time, when known
    pub modified_time: Option<NaiveDateTime>,
    /// Stable id stored with every reading and processed record
    pub source_file: String,
}

impl FileMetadata {
    pub fn is_archive_member(&self) -> bool {
        self.archive_origin.is_some()
    }
}

/// Normalize a path to use forward slashes consistently.
pub fn normalize_path_to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Source file id for a file on disk: its root-relative `/` path.
pub fn disk_source_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    normalize_path_to_forward_slashes(rel)
}

/// Source file id for an archive member: `<archive id>!/<entry>`.
pub fn member_source_id(archive_id: &str, entry_name: &str) -> String {
    format!(
        "{}{}{}",
        archive_id,
        ARCHIVE_MEMBER_SEPARATOR,
        entry_name.trim_start_matches('/')
    )
}

/// Last path segment of an archive member name.
pub fn member_base_name(entry_name: &str) -> &str {
    entry_name
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(entry_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_are_root_relative() {
        let root = Path::new("/data/plant");
        assert_eq!(
            disk_source_id(root, Path::new("/data/plant/line1/sensorA_2024-01-01.csv")),
            "line1/sensorA_2024-01-01.csv"
        );
        assert_eq!(
            member_source_id("line1/batch.zip", "inner/sensorB_2024-01-01.csv"),
            "line1/batch.zip!/inner/sensorB_2024-01-01.csv"
        );
    }

    #[test]
    fn member_base_name_strips_directories() {
        assert_eq!(member_base_name("a/b/c.csv"), "c.csv");
        assert_eq!(member_base_name("a\\b\\c.csv"), "c.csv");
        assert_eq!(member_base_name("c.csv"), "c.csv");
    }
}
