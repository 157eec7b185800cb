//! Discovery of secret files below a base directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Walk `directory` and return every regular file whose path matches `pattern`.
///
/// The pattern is not anchored here; use `^`/`$` in the pattern itself.
/// Directories are never returned, even when their own path matches. Entries
/// are visited in file-name order within each directory, and the walk stops at
/// the first error.
pub fn identify_secret_files(directory: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    if !directory.exists() {
        return Err(Error::DirectoryNotFound(directory.to_path_buf()));
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(|source| {
            if source.depth() == 0
                && source.io_error().map(|e| e.kind()) == Some(ErrorKind::NotFound)
            {
                Error::DirectoryNotFound(directory.to_path_buf())
            } else {
                Error::Walk {
                    path: source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| directory.to_path_buf()),
                    source,
                }
            }
        })?;

        if entry.file_type().is_dir() {
            continue;
        }
        if regex.is_match(&entry.path().to_string_lossy()) {
            debug!("Matched secret file {}", entry.path().display());
            matches.push(entry.into_path());
        }
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DEFAULT_PATTERN: &str = r"^.+/secrets?/.+$";

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "key: value\n").unwrap();
        path
    }

    #[test]
    fn returns_only_matching_files() {
        let tmp = TempDir::new().unwrap();
        let db = touch(tmp.path(), "app/secrets/db.yaml");
        touch(tmp.path(), "app/config/app.yaml");

        let found = identify_secret_files(tmp.path(), DEFAULT_PATTERN).unwrap();
        assert_eq!(found, vec![db]);
    }

    #[test]
    fn nested_and_singular_directories_match() {
        let tmp = TempDir::new().unwrap();
        let a = touch(tmp.path(), "a/secret/token.env");
        let b = touch(tmp.path(), "b/secrets/nested/cert.pem");

        let found = identify_secret_files(tmp.path(), DEFAULT_PATTERN).unwrap();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn directories_are_never_returned() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("app/secrets/empty")).unwrap();

        let found = identify_secret_files(tmp.path(), DEFAULT_PATTERN).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn pattern_is_unanchored() {
        let tmp = TempDir::new().unwrap();
        let key = touch(tmp.path(), "keys/deploy.key");
        touch(tmp.path(), "keys/readme.md");

        let found = identify_secret_files(tmp.path(), r"\.key").unwrap();
        assert_eq!(found, vec![key]);
    }

    #[test]
    fn invalid_pattern_fails_before_walking() {
        let missing = Path::new("/definitely/not/here");
        let err = identify_secret_files(missing, "(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_aborts_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "app/secrets/db.yaml");
        let locked = tmp.path().join("app/locked");
        fs::create_dir_all(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores directory permissions, so there is nothing to observe.
        let readable = fs::read_dir(&locked).is_ok();
        let result = identify_secret_files(tmp.path(), DEFAULT_PATTERN);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        if readable {
            return;
        }

        match result {
            Err(Error::Walk { path, .. }) => assert_eq!(path, locked),
            other => panic!("expected a walk error, got {other:?}"),
        }
    }

    #[test]
    fn missing_directory_is_reported() {
        let tmp = TempDir::new().unwrap();
        let err = identify_secret_files(&tmp.path().join("nope"), DEFAULT_PATTERN).unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound(_)));
    }
}
