//! Shared utility functions used across the codebase.

use std::path::{Component, Path, PathBuf};

/// Return the value of `$HOME`, falling back to `/root`.
pub fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/root".to_string())
}

/// `$XDG_CONFIG_HOME`, or `~/.config` when unset or empty.
pub fn config_home() -> PathBuf {
    match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(home_dir()).join(".config"),
    }
}

/// Resolve `path` against the current directory without touching the
/// filesystem. `.` components are dropped and each `..` removes the
/// component before it, so the result names the real ancestors of the file.
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            // `..` at the root stays at the root.
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_kept() {
        let path = Path::new("/tmp/secrets/db.yaml");
        assert_eq!(absolute_path(path).unwrap(), path);
    }

    #[test]
    fn relative_paths_are_joined_to_cwd() {
        let resolved = absolute_path(Path::new("secrets/db.yaml")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("secrets/db.yaml"));
    }

    #[test]
    fn current_dir_components_are_dropped() {
        let resolved = absolute_path(Path::new("./secrets/./db.yaml")).unwrap();
        assert_eq!(resolved, std::env::current_dir().unwrap().join("secrets/db.yaml"));
    }

    #[test]
    fn parent_dir_components_are_collapsed() {
        let resolved = absolute_path(Path::new("/srv/other/../app/./secrets/db.yaml")).unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/app/secrets/db.yaml"));

        let relative = absolute_path(Path::new("deploy/../secrets/db.yaml")).unwrap();
        assert_eq!(relative, std::env::current_dir().unwrap().join("secrets/db.yaml"));
    }

    #[test]
    fn parent_dir_never_climbs_above_root() {
        let resolved = absolute_path(Path::new("/../../etc/secrets/x.env")).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/secrets/x.env"));
    }
}
