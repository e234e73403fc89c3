use crate::nts_error::NtsError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Normalizes `path` into an absolute, `.`/`..`-resolved string suitable for hashing into a
/// token's `pathHash8` and for comparing file identity across calls. Does not touch the
/// filesystem: `..` segments are popped lexically rather than resolved through symlinks.
pub fn normalize_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")).join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// First 8 hex characters of SHA-256 over the normalized absolute path string, used as the
/// `pathHash8` segment of a serialized line access token.
pub fn path_hash8(path: &Path) -> String {
    let normalized = normalize_absolute_path(path);
    let digest = Sha256::digest(normalized.to_string_lossy().as_bytes());
    let hex = digest.iter().map(|b| format!("{:02X}", b)).collect::<String>();
    hex[..8].to_string()
}

/// Rejects any path that, once normalized and resolved against `working_directory`, would fall
/// outside it. Every façade tool validates its path argument through this before touching disk.
pub fn sanitize_within(working_directory: &Path, candidate: &Path) -> Result<PathBuf, NtsError> {
    let resolved = if candidate.is_absolute() {
        normalize_absolute_path(candidate)
    } else {
        normalize_absolute_path(&working_directory.join(candidate))
    };

    let root = normalize_absolute_path(working_directory);
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(NtsError::PathEscapesWorkingDirectory(candidate.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_parent_dir_segments() {
        let normalized = normalize_absolute_path(Path::new("/a/b/../c/./d"));
        assert_eq!(normalized, PathBuf::from("/a/c/d"));
    }

    #[test]
    fn path_hash8_is_stable_for_equivalent_paths() {
        let a = path_hash8(Path::new("/work/./src/lib.rs"));
        let b = path_hash8(Path::new("/work/x/../src/lib.rs"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn sanitize_within_rejects_escape_via_parent_dir() {
        let root = Path::new("/work/task");
        let result = sanitize_within(root, Path::new("../../etc/passwd"));
        assert!(matches!(result, Err(NtsError::PathEscapesWorkingDirectory(_))));
    }

    #[test]
    fn sanitize_within_accepts_nested_relative_path() {
        let root = Path::new("/work/task");
        let result = sanitize_within(root, Path::new("src/lib.rs")).unwrap();
        assert_eq!(result, PathBuf::from("/work/task/src/lib.rs"));
    }
}
