//! Lazy recursive scan of a root folder.
//!
//! # Design
//!
//! - Walk with `walkdir`, entries sorted by file name so a run is repeatable
//! - `.csv` files are candidates; `.zip` files are opened and their `.csv`
//!   members become virtual candidates
//! - Every problem becomes a [`ScanOutcome::Skipped`] value; the iterator
//!   keeps going

use super::error::ScanError;
use super::patterns::NamePatterns;
use super::reader::open_archive;
use super::types::{disk_source_id, member_base_name, member_source_id, FileMetadata};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// One step of a scan.
#[derive(Debug)]
pub enum ScanOutcome {
    Found(FileMetadata),
    Skipped(ScanSkip),
}

/// An entry the scan could not use.
#[derive(Debug)]
pub struct ScanSkip {
    /// Root-relative id of the skipped file or archive
    pub path: String,
    /// True when a whole archive was dropped
    pub is_archive: bool,
    pub error: ScanError,
}

/// Discovers candidate sensor files under a root.
pub struct FileScanner {
    root: PathBuf,
    patterns: NamePatterns,
}

impl FileScanner {
    pub fn new(root: impl Into<PathBuf>, patterns: NamePatterns) -> Self {
        Self {
            root: root.into(),
            patterns,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a scan. Nothing is read until the iterator is advanced.
    pub fn scan(&self) -> Scan<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Scan {
            scanner: self,
            walker,
            pending: VecDeque::new(),
        }
    }
}

/// Iterator returned by [`FileScanner::scan`].
pub struct Scan<'a> {
    scanner: &'a FileScanner,
    walker: walkdir::IntoIter,
    pending: VecDeque<ScanOutcome>,
}

impl Iterator for Scan<'_> {
    type Item = ScanOutcome;

    fn next(&mut self) -> Option<ScanOutcome> {
        loop {
            if let Some(outcome) = self.pending.pop_front() {
                return Some(outcome);
            }

            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| disk_source_id(&self.scanner.root, p))
                        .unwrap_or_default();
                    return Some(ScanOutcome::Skipped(ScanSkip {
                        path,
                        is_archive: false,
                        error: ScanError::Walk(err),
                    }));
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match extension_lower(entry.path()).as_deref() {
                Some("csv") => {
                    if let Some(outcome) = self.disk_candidate(&entry) {
                        return Some(outcome);
                    }
                }
                Some("zip") => self.expand_archive(&entry),
                _ => {}
            }
        }
    }
}

impl Scan<'_> {
    fn disk_candidate(&self, entry: &DirEntry) -> Option<ScanOutcome> {
        let name = entry.file_name().to_string_lossy().to_string();
        if !self.scanner.patterns.is_match(&name) {
            return None;
        }

        let source_file = disk_source_id(&self.scanner.root, entry.path());
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                return Some(ScanOutcome::Skipped(ScanSkip {
                    path: source_file,
                    is_archive: false,
                    error: ScanError::Walk(err),
                }))
            }
        };

        Some(ScanOutcome::Found(FileMetadata {
            path: entry.path().to_path_buf(),
            archive_origin: None,
            entry_name: None,
            inferred_name: name,
            size: metadata.len(),
            modified_time: metadata.modified().ok().map(system_time_to_local),
            source_file,
        }))
    }

    /// Queue the matching `.csv` members of an archive, or a skip for the
    /// whole archive when it cannot be opened.
    fn expand_archive(&mut self, entry: &DirEntry) {
        let archive_path = entry.path();
        let archive_id = disk_source_id(&self.scanner.root, archive_path);

        let mut archive = match open_archive(archive_path) {
            Ok(archive) => archive,
            Err(error) => {
                self.pending.push_back(ScanOutcome::Skipped(ScanSkip {
                    path: archive_id,
                    is_archive: true,
                    error,
                }));
                return;
            }
        };

        let mut members = Vec::new();
        for index in 0..archive.len() {
            let member = match archive.by_index_raw(index) {
                Ok(member) => member,
                Err(err) => {
                    self.pending.push_back(ScanOutcome::Skipped(ScanSkip {
                        path: archive_id,
                        is_archive: true,
                        error: ScanError::Archive(err),
                    }));
                    return;
                }
            };
            if member.is_dir() {
                continue;
            }

            let entry_name = member.name().to_string();
            let base_name = member_base_name(&entry_name).to_string();
            if extension_lower(Path::new(&base_name)).as_deref() != Some("csv")
                || !self.scanner.patterns.is_match(&base_name)
            {
                continue;
            }

            members.push(FileMetadata {
                path: archive_path.to_path_buf(),
                archive_origin: Some(archive_path.to_path_buf()),
                source_file: member_source_id(&archive_id, &entry_name),
                entry_name: Some(entry_name),
                inferred_name: base_name,
                size: member.size(),
                modified_time: member.last_modified().and_then(zip_time_to_naive),
            });
        }

        debug!(
            archive = %archive_id,
            members = members.len(),
            "Expanded archive"
        );
        self.pending
            .extend(members.into_iter().map(ScanOutcome::Found));
    }
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

fn system_time_to_local(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

fn zip_time_to_naive(time: zip::DateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(time.year() as i32, time.month() as u32, time.day() as u32)?
        .and_hms_opt(
            time.hour() as u32,
            time.minute() as u32,
            time.second() as u32,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn collect(scanner: &FileScanner) -> (Vec<FileMetadata>, Vec<ScanSkip>) {
        let mut found = Vec::new();
        let mut skipped = Vec::new();
        for outcome in scanner.scan() {
            match outcome {
                ScanOutcome::Found(meta) => found.push(meta),
                ScanOutcome::Skipped(skip) => skipped.push(skip),
            }
        }
        (found, skipped)
    }

    #[test]
    fn finds_csv_recursively_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/z_2024-01-01.csv"), "x").unwrap();
        fs::write(dir.path().join("a_2024-01-01.CSV"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let scanner = FileScanner::new(dir.path(), NamePatterns::new::<&str>(&[]).unwrap());
        let (found, skipped) = collect(&scanner);

        let ids: Vec<_> = found.iter().map(|m| m.source_file.as_str()).collect();
        assert_eq!(ids, vec!["a_2024-01-01.CSV", "b/z_2024-01-01.csv"]);
        assert!(skipped.is_empty());
        assert!(found.iter().all(|m| m.modified_time.is_some()));
    }

    #[test]
    fn applies_patterns_to_base_name_only() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Vib")).unwrap();
        fs::write(dir.path().join("Vib/line_2024-01-01_Tmp.csv"), "x").unwrap();
        fs::write(dir.path().join("line_2024-01-01_Vib.csv"), "x").unwrap();

        let scanner = FileScanner::new(dir.path(), NamePatterns::new(&["Vib"]).unwrap());
        let (found, _) = collect(&scanner);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].inferred_name, "line_2024-01-01_Vib.csv");
    }

    #[test]
    fn lists_csv_members_of_archives() {
        let dir = TempDir::new().unwrap();
        write_zip(
            &dir.path().join("batch.zip"),
            &[
                ("inner/sensorA_2024-01-01.csv", "a"),
                ("readme.txt", "ignored"),
            ],
        );

        let scanner = FileScanner::new(dir.path(), NamePatterns::new::<&str>(&[]).unwrap());
        let (found, skipped) = collect(&scanner);

        assert!(skipped.is_empty());
        assert_eq!(found.len(), 1);
        let member = &found[0];
        assert_eq!(member.source_file, "batch.zip!/inner/sensorA_2024-01-01.csv");
        assert_eq!(member.inferred_name, "sensorA_2024-01-01.csv");
        assert_eq!(member.entry_name.as_deref(), Some("inner/sensorA_2024-01-01.csv"));
        assert_eq!(member.archive_origin.as_deref(), Some(dir.path().join("batch.zip").as_path()));
        assert_eq!(member.size, 1);
    }

    #[test]
    fn corrupt_archive_is_skipped_and_scan_continues() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a_broken.zip"), b"this is not a zip file").unwrap();
        fs::write(dir.path().join("b_2024-01-01.csv"), "x").unwrap();

        let scanner = FileScanner::new(dir.path(), NamePatterns::new::<&str>(&[]).unwrap());
        let (found, skipped) = collect(&scanner);

        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].is_archive);
        assert_eq!(skipped[0].path, "a_broken.zip");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_file, "b_2024-01-01.csv");
    }
}
