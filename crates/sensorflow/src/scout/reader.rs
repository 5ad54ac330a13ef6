//! Byte-level reads of discovered files with bounded retry.

use super::error::{Result, ScanError};
use super::types::FileMetadata;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Attempts per read, including the first.
pub const READ_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Read a file's full contents, from disk or from inside its archive.
pub fn read_file_bytes(meta: &FileMetadata) -> Result<Vec<u8>> {
    match (&meta.archive_origin, &meta.entry_name) {
        (Some(archive), Some(entry)) => {
            with_retry(archive, || read_archive_member(archive, entry))
        }
        _ => with_retry(&meta.path, || Ok(std::fs::read(&meta.path)?)),
    }
}

/// Open an archive for listing its members.
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    with_retry(path, || {
        let file = File::open(path)?;
        Ok(ZipArchive::new(file)?)
    })
}

fn read_archive_member(archive: &Path, entry: &str) -> Result<Vec<u8>> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut member = zip.by_name(entry)?;
    let mut buf = Vec::with_capacity(member.size() as usize);
    // Decompression and CRC failures surface here as io errors.
    member.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Run `op` up to [`READ_ATTEMPTS`] times with linear back-off, retrying only
/// errors that can plausibly clear on their own.
pub fn with_retry<T, F>(path: &Path, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < READ_ATTEMPTS && is_transient(&err) => {
                debug!(
                    path = %path.display(),
                    attempt,
                    error = %err,
                    "Transient read failure, retrying"
                );
                thread::sleep(RETRY_BACKOFF * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_transient(err: &ScanError) -> bool {
    let io_err = match err {
        ScanError::Io(e) => e,
        ScanError::Archive(ZipError::Io(e)) => e,
        _ => return false,
    };
    !matches!(
        io_err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Unsupported
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;

    #[test]
    fn retries_transient_errors_then_succeeds() {
        let calls = Cell::new(0);
        let result = with_retry(Path::new("x"), || {
            calls.set(calls.get() + 1);
            if calls.get() < READ_ATTEMPTS {
                Err(ScanError::Io(io::Error::new(io::ErrorKind::Interrupted, "flaky")))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), READ_ATTEMPTS);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(Path::new("x"), || {
            calls.set(calls.get() + 1);
            Err(ScanError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow share")))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), READ_ATTEMPTS);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(Path::new("x"), || {
            calls.set(calls.get() + 1);
            Err(ScanError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reads_disk_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("a.csv");
        std::fs::write(&path, b"abc").unwrap();
        let meta = FileMetadata {
            path: path.clone(),
            archive_origin: None,
            entry_name: None,
            inferred_name: "a.csv".to_string(),
            size: 3,
            modified_time: None,
            source_file: "a.csv".to_string(),
        };
        assert_eq!(read_file_bytes(&meta).unwrap(), b"abc");
    }
}
