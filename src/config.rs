//! Per-file encryption policy from `.sops.yaml`.
//!
//! The nearest `.sops.yaml` in the file's directory or any ancestor applies.
//! Its `creation_rules` are tried in order and the first rule whose
//! `path_regex` matches the file (relative to the config's directory) wins:
//!
//! ```yaml
//! creation_rules:
//!   - path_regex: secrets/.*\.yaml$
//!     encrypted_regex: ^(password|token)$
//!     key_groups:
//!       - age: [age1...]
//!       - age: [age1...]
//!     shamir_threshold: 2
//!   - age: age1...,age1...
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sops::{KeyGroup, MasterKey};

/// Name of the per-directory configuration file.
pub const CONFIG_FILE_NAME: &str = ".sops.yaml";

/// Suffix left unencrypted when a rule selects no fields explicitly.
pub const DEFAULT_UNENCRYPTED_SUFFIX: &str = "_unencrypted";

/// How many parent directories to search for a config file.
const MAX_CONFIG_DEPTH: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {CONFIG_FILE_NAME} found in any parent directory of {0:?}")]
    NotFound(PathBuf),

    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("cannot compile path_regex {pattern:?}: {source}")]
    InvalidPathRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("no matching creation rules found for {0:?}")]
    NoMatchingRule(PathBuf),

    #[error("can only specify one of encrypted_suffix, unencrypted_suffix, encrypted_regex or unencrypted_regex")]
    ConflictingFieldSelection,

    #[error("shamir_threshold {threshold} is larger than the number of key groups ({groups})")]
    ThresholdTooHigh { threshold: usize, groups: usize },
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    creation_rules: Vec<CreationRule>,
}

#[derive(Debug, Default, Deserialize)]
struct RawKeyGroup {
    #[serde(default)]
    age: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CreationRule {
    path_regex: Option<String>,
    /// Comma-separated recipients forming a single key group.
    age: Option<String>,
    #[serde(default)]
    key_groups: Vec<RawKeyGroup>,
    #[serde(default)]
    shamir_threshold: usize,
    encrypted_suffix: Option<String>,
    unencrypted_suffix: Option<String>,
    encrypted_regex: Option<String>,
    unencrypted_regex: Option<String>,
    #[serde(default)]
    mac_only_encrypted: bool,
    /// Key sources this tool cannot use (pgp, kms, ...).
    #[serde(flatten)]
    unsupported: BTreeMap<String, serde_yaml::Value>,
}

/// Resolved encryption policy for one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub key_groups: Vec<KeyGroup>,
    pub shamir_threshold: usize,
    pub unencrypted_suffix: Option<String>,
    pub encrypted_suffix: Option<String>,
    pub unencrypted_regex: Option<String>,
    pub encrypted_regex: Option<String>,
    pub mac_only_encrypted: bool,
}

/// Find the nearest config file, starting in the directory containing `path`.
pub fn find_config_file(path: &Path) -> Result<PathBuf, ConfigError> {
    let start = path.parent().unwrap_or(path);
    start
        .ancestors()
        .take(MAX_CONFIG_DEPTH)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ConfigError::NotFound(path.to_path_buf()))
}

/// Load the creation rule from `config_path` that applies to `file_path`.
pub fn load_creation_rule_for_file(
    config_path: &Path,
    file_path: &Path,
) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    let config_file: ConfigFile = if content.trim().is_empty() {
        ConfigFile::default()
    } else {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?
    };

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new(""));
    let relative = file_path.strip_prefix(config_dir).unwrap_or(file_path);
    let relative = relative.to_string_lossy();

    for rule in config_file.creation_rules {
        let matches = match rule.path_regex.as_deref() {
            None | Some("") => true,
            Some(pattern) => Regex::new(pattern)
                .map_err(|source| ConfigError::InvalidPathRegex {
                    pattern: pattern.to_string(),
                    source,
                })?
                .is_match(&relative),
        };
        if matches {
            debug!(
                "Using creation rule {:?} from {} for {}",
                rule.path_regex.as_deref().unwrap_or("<any>"),
                config_path.display(),
                relative
            );
            return config_from_rule(rule);
        }
    }

    Err(ConfigError::NoMatchingRule(file_path.to_path_buf()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn config_from_rule(rule: CreationRule) -> Result<Config, ConfigError> {
    for field in rule.unsupported.keys() {
        warn!("Ignoring unsupported creation rule field '{}'", field);
    }

    let key_groups: Vec<KeyGroup> = if !rule.key_groups.is_empty() {
        rule.key_groups
            .into_iter()
            .map(|group| group.age.into_iter().map(MasterKey::new).collect())
            .collect()
    } else {
        let recipients: KeyGroup = rule
            .age
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(MasterKey::new)
            .collect();
        if recipients.is_empty() {
            Vec::new()
        } else {
            vec![recipients]
        }
    };

    if key_groups.len() > 1 && rule.shamir_threshold > key_groups.len() {
        return Err(ConfigError::ThresholdTooHigh {
            threshold: rule.shamir_threshold,
            groups: key_groups.len(),
        });
    }

    let mut unencrypted_suffix = non_empty(rule.unencrypted_suffix);
    let encrypted_suffix = non_empty(rule.encrypted_suffix);
    let unencrypted_regex = non_empty(rule.unencrypted_regex);
    let encrypted_regex = non_empty(rule.encrypted_regex);

    let selectors = [
        unencrypted_suffix.is_some(),
        encrypted_suffix.is_some(),
        unencrypted_regex.is_some(),
        encrypted_regex.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if selectors > 1 {
        return Err(ConfigError::ConflictingFieldSelection);
    }
    if selectors == 0 {
        unencrypted_suffix = Some(DEFAULT_UNENCRYPTED_SUFFIX.to_string());
    }

    Ok(Config {
        key_groups,
        shamir_threshold: rule.shamir_threshold,
        unencrypted_suffix,
        encrypted_suffix,
        unencrypted_regex,
        encrypted_regex,
        mac_only_encrypted: rule.mac_only_encrypted,
    })
}
