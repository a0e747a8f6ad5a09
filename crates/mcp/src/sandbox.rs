//! Filesystem sandboxing for write-capable tools.
//!
//! Write-capable tools may only touch paths under the configured data
//! root; anything else is rejected before the call reaches the
//! filesystem. Paths are canonicalized so symlinks and `..` segments
//! cannot escape the root.

use std::path::{Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path '{path}' is outside the data root")]
    OutsideRoot { path: String },

    #[error("path traversal detected in '{path}'")]
    Traversal { path: String },

    #[error("failed to canonicalize '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Validate that a path stays inside `root`.
///
/// Checks, in order:
/// 1. No `..` traversal in the raw string
/// 2. Canonicalization (of the parent for not-yet-existing files)
/// 3. Prefix containment under the canonicalized root
///
/// Returns the resolved path on success.
pub fn validate_path(path: &str, root: &Path) -> Result<PathBuf, SandboxError> {
    let raw = path.replace('\\', "/");
    if raw.contains("../") || raw.contains("/..") || raw == ".." {
        return Err(SandboxError::Traversal { path: path.into() });
    }

    let input = Path::new(path);
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };

    // Canonicalize the deepest existing ancestor so writes to new files
    // still resolve symlinks.
    let canonical = if joined.exists() {
        joined
            .canonicalize()
            .map_err(|e| SandboxError::CanonicalizeFailed {
                path: path.into(),
                reason: e.to_string(),
            })?
    } else if let Some(parent) = joined.parent() {
        if parent.exists() {
            let canonical_parent =
                parent
                    .canonicalize()
                    .map_err(|e| SandboxError::CanonicalizeFailed {
                        path: path.into(),
                        reason: format!("parent dir: {e}"),
                    })?;
            canonical_parent.join(joined.file_name().unwrap_or_default())
        } else {
            joined.clone()
        }
    } else {
        joined.clone()
    };

    let canonical_root = root
        .canonicalize()
        .map_err(|e| SandboxError::CanonicalizeFailed {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

    if !canonical.starts_with(&canonical_root) {
        return Err(SandboxError::OutsideRoot { path: path.into() });
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = validate_path("notes/out.txt", dir.path()).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_path("../escape.txt", dir.path()),
            Err(SandboxError::Traversal { .. })
        ));
        assert!(matches!(
            validate_path("a/../../escape.txt", dir.path()),
            Err(SandboxError::Traversal { .. })
        ));
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("file.txt");
        std::fs::write(&outside, "x").unwrap();

        assert!(matches!(
            validate_path(outside.to_str().unwrap(), dir.path()),
            Err(SandboxError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn absolute_path_inside_root_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("file.txt");
        std::fs::write(&inside, "x").unwrap();

        let resolved = validate_path(inside.to_str().unwrap(), dir.path()).unwrap();
        assert!(resolved.ends_with("file.txt"));
    }

    #[test]
    fn symlink_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(other.path(), &link).unwrap();
            assert!(matches!(
                validate_path(link.join("f.txt").to_str().unwrap(), dir.path()),
                Err(SandboxError::OutsideRoot { .. })
            ));
        }
    }
}
