//! Crate-level error type.
//!
//! Every variant names the path it concerns so that batch runs can log a
//! failure and move on to the next file.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::sops::{DataKeyErrors, StoreError, TreeError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid secret pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("cannot determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("directory not found: {0:?}")]
    DirectoryNotFound(PathBuf),

    #[error("failed to walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("failed to find config file for {0:?}")]
    ConfigNotFound(PathBuf),

    #[error("failed to load config for {path:?}: {source}")]
    ConfigLoad { path: PathBuf, source: ConfigError },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to load {path:?}: {source}")]
    Load { path: PathBuf, source: StoreError },

    #[error("failed to generate data key for {path:?}: {source}")]
    DataKey {
        path: PathBuf,
        source: DataKeyErrors,
    },

    #[error("failed to encrypt {path:?}: {source}")]
    Encryption { path: PathBuf, source: TreeError },

    #[error("failed to decrypt {path:?}: {source}")]
    Decryption { path: PathBuf, source: TreeError },

    #[error("failed to serialize {path:?}: {source}")]
    Serialization { path: PathBuf, source: StoreError },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_dir_failure_is_not_reported_against_a_file() {
        let err = Error::CurrentDir(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cwd removed",
        ));
        let message = err.to_string();
        assert!(message.starts_with("cannot determine the current directory"));
        assert!(!message.contains("failed to read"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
