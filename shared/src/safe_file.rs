use crate::options::Options;
use crate::nts_error::NtsError;
use fs2::FileExt as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Atomic write/copy/move/delete over ordinary files, with bounded retry on transient OS
/// errors and a writeability probe. Every operation is crash-consistent: at any instant either
/// the original or a complete new file is reachable under the target path (spec §4.1, testable
/// property 1).
pub struct SafeFileIo {
    options: Arc<Options>,
}

impl SafeFileIo {
    pub fn new(options: Arc<Options>) -> SafeFileIo {
        SafeFileIo { options }
    }

    /// Safe-swap write: stage `path.tmp`, back up the existing file to `path.old`, swap the
    /// two renames into place, and clean up. On failure of the final rename the original is
    /// restored from `path.old` before the error is surfaced.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), NtsError> {
        let tmp_path = Self::tmp_path(path);
        let old_path = Self::old_path(path);

        self.retrying(path, || fs::write(&tmp_path, bytes))?;

        let had_previous = path.exists();
        if had_previous {
            self.retrying(path, || fs::rename(path, &old_path))?;
        }

        match self.retrying(path, || fs::rename(&tmp_path, path)) {
            Ok(()) => {
                if had_previous {
                    let _ = fs::remove_file(&old_path);
                }
                Ok(())
            }
            Err(e) => {
                if had_previous {
                    let _ = fs::rename(&old_path, path);
                }
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    pub fn copy(&self, src: &Path, dst: &Path) -> Result<(), NtsError> {
        let bytes = self.read_all(src)?;
        self.write(dst, &bytes)
    }

    pub fn move_file(&self, src: &Path, dst: &Path) -> Result<(), NtsError> {
        self.retrying(dst, || fs::rename(src, dst))
    }

    pub fn delete(&self, path: &Path) -> Result<(), NtsError> {
        if !path.exists() {
            return Ok(());
        }
        self.retrying(path, || fs::remove_file(path))
    }

    pub fn read_all(&self, path: &Path) -> Result<Vec<u8>, NtsError> {
        if !path.exists() {
            return Err(NtsError::FileNotFound(path.to_path_buf()));
        }
        self.retrying(path, || fs::read(path))
    }

    /// Opens `path` for writing and attempts a non-blocking exclusive lock. A file that
    /// vanishes between the existence check and the open is treated as not-locked.
    pub fn probe_writeable(&self, path: &Path) -> Result<(), NtsError> {
        let file = match OpenOptions::new().write(true).create(true).truncate(false).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(NtsError::IoAccessDenied(path.to_path_buf(), e)),
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                Ok(())
            }
            Err(_) => Err(NtsError::IoFileLocked(path.to_path_buf())),
        }
    }

    fn tmp_path(path: &Path) -> PathBuf {
        Self::sibling_with_suffix(path, "tmp")
    }

    fn old_path(path: &Path) -> PathBuf {
        Self::sibling_with_suffix(path, "old")
    }

    fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(suffix);
        path.with_file_name(name)
    }

    /// Up to `io_retry_attempts` tries with exponential backoff starting at
    /// `io_retry_base_delay_ms` (50, 100, 200, 400, 800ms by default) on transient errors.
    /// The last error is surfaced once retries are exhausted.
    fn retrying<T>(&self, path: &Path, mut op: impl FnMut() -> io::Result<T>) -> Result<T, NtsError> {
        let mut delay_ms = self.options.io_retry_base_delay_ms;
        let mut last_error = None;

        for attempt in 0..self.options.io_retry_attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Err(NtsError::Io(e));
                }
                Err(e) if !Self::is_transient(&e) => {
                    return Err(NtsError::IoAccessDenied(path.to_path_buf(), e));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < self.options.io_retry_attempts {
                        std::thread::sleep(Duration::from_millis(delay_ms));
                        delay_ms *= 2;
                    }
                }
            }
        }

        Err(NtsError::IoRetriesExhausted(path.to_path_buf(), last_error.unwrap()))
    }

    fn is_transient(error: &io::Error) -> bool {
        matches!(
            error.kind(),
            io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ) || matches!(error.raw_os_error(), Some(16) | Some(26) | Some(32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn io() -> SafeFileIo {
        SafeFileIo::new(Arc::new(Options::default()))
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let io = io();

        io.write(&path, b"hello").unwrap();
        assert_eq!(io.read_all(&path).unwrap(), b"hello");

        io.write(&path, b"world!!").unwrap();
        assert_eq!(io.read_all(&path).unwrap(), b"world!!");

        assert!(!SafeFileIo::tmp_path(&path).exists());
        assert!(!SafeFileIo::old_path(&path).exists());
    }

    #[test]
    fn copy_duplicates_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        let io = io();

        io.write(&src, b"payload").unwrap();
        io.copy(&src, &dst).unwrap();

        assert_eq!(io.read_all(&dst).unwrap(), b"payload");
    }

    #[test]
    fn move_file_relocates_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        let io = io();

        io.write(&src, b"payload").unwrap();
        io.move_file(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(io.read_all(&dst).unwrap(), b"payload");
    }

    #[test]
    fn delete_is_idempotent_on_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        io().delete(&path).unwrap();
    }

    #[test]
    fn probe_writeable_rejects_locked_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        io().write(&path, b"data").unwrap();

        let file = File::options().write(true).open(&path).unwrap();
        fs2::FileExt::lock_exclusive(&file).unwrap();

        let result = io().probe_writeable(&path);
        assert!(matches!(result, Err(NtsError::IoFileLocked(_))));
    }
}
