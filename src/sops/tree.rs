//! Document tree and encryption metadata.
//!
//! A [`Tree`] is the parsed content of one secret file (an ordered mapping)
//! plus the [`Metadata`] describing who can decrypt it and which fields are
//! encrypted.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rand::RngCore;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::debug;

use super::cipher::{is_encrypted, Cipher, CipherError, KEY_LENGTH};
use super::keys::{KeyError, KeyGroup, KeyService};
use super::shamir::{self, ShamirError};

#[derive(Debug, Error)]
pub enum DataKeyError {
    #[error("no key groups provided")]
    NoKeyGroups,
    #[error("key group {0} has no master keys")]
    EmptyKeyGroup(usize),
    #[error("shamir threshold {threshold} exceeds the number of key groups ({groups})")]
    ThresholdTooHigh { threshold: usize, groups: usize },
    #[error("failed to split data key: {0}")]
    Split(ShamirError),
    #[error("failed to combine key shares: {0}")]
    Combine(ShamirError),
    #[error("key group {group}: {source}")]
    MasterKey { group: usize, source: KeyError },
    #[error("only {recovered} of {threshold} required key groups could be decrypted")]
    ThresholdNotMet { recovered: usize, threshold: usize },
}

/// Every error produced while generating or recovering a data key.
///
/// Key handling does not stop at the first failing master key, so callers
/// see one entry per failure.
#[derive(Debug)]
pub struct DataKeyErrors(pub Vec<DataKeyError>);

impl fmt::Display for DataKeyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for DataKeyErrors {}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("failed to encrypt value at {path:?}: {source}")]
    Encrypt { path: String, source: CipherError },
    #[error("failed to decrypt value at {path:?}: {source}")]
    Decrypt { path: String, source: CipherError },
    #[error("invalid field selection regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
    #[error("failed to process message authentication code: {0}")]
    Mac(CipherError),
    #[error("metadata holds no message authentication code")]
    MissingMac,
    #[error("message authentication code mismatch: file content has been modified")]
    MacMismatch,
    #[error("could not retrieve data key: {0}")]
    DataKey(#[from] DataKeyErrors),
}

/// Encryption policy and key material for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub key_groups: Vec<KeyGroup>,
    /// Number of key groups needed to rebuild the data key; 0 means all.
    pub shamir_threshold: usize,
    pub last_modified: DateTime<Utc>,
    /// Encrypted SHA-512 over the plaintext values, empty until encrypted.
    pub message_authentication_code: String,
    pub unencrypted_suffix: Option<String>,
    pub encrypted_suffix: Option<String>,
    pub unencrypted_regex: Option<String>,
    pub encrypted_regex: Option<String>,
    pub mac_only_encrypted: bool,
    pub version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            key_groups: Vec::new(),
            shamir_threshold: 0,
            last_modified: now(),
            message_authentication_code: String::new(),
            unencrypted_suffix: None,
            encrypted_suffix: None,
            unencrypted_regex: None,
            encrypted_regex: None,
            mac_only_encrypted: false,
            version: String::new(),
        }
    }
}

/// Current time truncated to whole seconds, the precision stored on disk.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

impl Metadata {
    pub fn last_modified_string(&self) -> String {
        self.last_modified
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn effective_threshold(&self) -> usize {
        if self.shamir_threshold == 0 {
            self.key_groups.len()
        } else {
            self.shamir_threshold
        }
    }

    /// Generate a fresh data key and wrap it for every master key.
    ///
    /// With more than one key group the key is split into one Shamir share
    /// per group. The `enc` field of every master key is overwritten.
    pub fn generate_data_key(
        &mut self,
        key_service: &dyn KeyService,
    ) -> Result<Vec<u8>, DataKeyErrors> {
        let mut data_key = vec![0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut data_key);
        self.update_master_keys(&data_key, key_service)?;
        Ok(data_key)
    }

    fn update_master_keys(
        &mut self,
        data_key: &[u8],
        key_service: &dyn KeyService,
    ) -> Result<(), DataKeyErrors> {
        if self.key_groups.is_empty() {
            return Err(DataKeyErrors(vec![DataKeyError::NoKeyGroups]));
        }

        let empty: Vec<DataKeyError> = self
            .key_groups
            .iter()
            .enumerate()
            .filter(|(_, group)| group.is_empty())
            .map(|(idx, _)| DataKeyError::EmptyKeyGroup(idx))
            .collect();
        if !empty.is_empty() {
            return Err(DataKeyErrors(empty));
        }

        let parts = if self.key_groups.len() == 1 {
            vec![data_key.to_vec()]
        } else {
            let threshold = self.effective_threshold();
            if threshold > self.key_groups.len() {
                return Err(DataKeyErrors(vec![DataKeyError::ThresholdTooHigh {
                    threshold,
                    groups: self.key_groups.len(),
                }]));
            }
            self.shamir_threshold = threshold;
            shamir::split(data_key, self.key_groups.len(), threshold)
                .map_err(|e| DataKeyErrors(vec![DataKeyError::Split(e)]))?
        };

        let mut errors = Vec::new();
        for (group_idx, (group, part)) in self.key_groups.iter_mut().zip(&parts).enumerate() {
            for key in group.iter_mut() {
                match key_service.encrypt(key, part) {
                    Ok(enc) => key.enc = enc,
                    Err(source) => errors.push(DataKeyError::MasterKey {
                        group: group_idx,
                        source,
                    }),
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataKeyErrors(errors))
        }
    }

    /// Recover the data key from whichever master keys the key service can open.
    pub fn get_data_key(&self, key_service: &dyn KeyService) -> Result<Vec<u8>, DataKeyErrors> {
        if self.key_groups.is_empty() {
            return Err(DataKeyErrors(vec![DataKeyError::NoKeyGroups]));
        }

        let threshold = if self.key_groups.len() == 1 {
            1
        } else {
            self.effective_threshold()
        };

        let mut errors = Vec::new();
        let mut parts = Vec::new();
        for (group_idx, group) in self.key_groups.iter().enumerate() {
            if parts.len() >= threshold {
                break;
            }
            for key in group {
                match key_service.decrypt(key) {
                    Ok(part) => {
                        debug!("Decrypted data key part with {}", key.recipient);
                        parts.push(part);
                        break;
                    }
                    Err(source) => errors.push(DataKeyError::MasterKey {
                        group: group_idx,
                        source,
                    }),
                }
            }
        }

        if parts.len() < threshold {
            errors.push(DataKeyError::ThresholdNotMet {
                recovered: parts.len(),
                threshold,
            });
            return Err(DataKeyErrors(errors));
        }

        if self.key_groups.len() == 1 {
            return Ok(parts.remove(0));
        }
        shamir::combine(&parts).map_err(|e| DataKeyErrors(vec![DataKeyError::Combine(e)]))
    }
}

/// Parsed document content together with its encryption metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub branches: Mapping,
    pub metadata: Metadata,
    pub file_path: PathBuf,
}

/// Decides which leaves are encrypted based on the mapping keys above them.
struct FieldSelector {
    unencrypted_suffix: Option<String>,
    encrypted_suffix: Option<String>,
    unencrypted_regex: Option<Regex>,
    encrypted_regex: Option<Regex>,
}

impl FieldSelector {
    fn from_metadata(metadata: &Metadata) -> Result<Self, TreeError> {
        let compile = |pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(|p| {
                    Regex::new(p).map_err(|source| TreeError::InvalidRegex {
                        pattern: p.to_string(),
                        source,
                    })
                })
                .transpose()
        };

        Ok(Self {
            unencrypted_suffix: metadata.unencrypted_suffix.clone(),
            encrypted_suffix: metadata.encrypted_suffix.clone(),
            unencrypted_regex: compile(&metadata.unencrypted_regex)?,
            encrypted_regex: compile(&metadata.encrypted_regex)?,
        })
    }

    fn should_encrypt(&self, path: &[String]) -> bool {
        let mut encrypt = self.encrypted_suffix.is_none() && self.encrypted_regex.is_none();
        for key in path {
            if matches!(&self.unencrypted_suffix, Some(s) if key.ends_with(s.as_str())) {
                encrypt = false;
            }
            if matches!(&self.encrypted_suffix, Some(s) if key.ends_with(s.as_str())) {
                return true;
            }
            if matches!(&self.unencrypted_regex, Some(re) if re.is_match(key)) {
                encrypt = false;
            }
            if matches!(&self.encrypted_regex, Some(re) if re.is_match(key)) {
                return true;
            }
        }
        encrypt
    }
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => format!("{:?}", other),
    }
}

fn additional_data(path: &[String]) -> String {
    let mut aad = path.join(":");
    aad.push(':');
    aad
}

fn plaintext_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Bool(b) => b.to_string().into_bytes(),
        Value::Number(n) => n.to_string().into_bytes(),
        _ => Vec::new(),
    }
}

/// Call `visit` on every non-null scalar, tracking the mapping-key path.
fn visit_leaves<F>(value: &mut Value, path: &mut Vec<String>, visit: &mut F) -> Result<(), TreeError>
where
    F: FnMut(&[String], &mut Value) -> Result<(), TreeError>,
{
    match value {
        Value::Mapping(map) => visit_mapping(map, path, visit),
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                visit_leaves(item, path, visit)?;
            }
            Ok(())
        }
        Value::Tagged(tagged) => visit_leaves(&mut tagged.value, path, visit),
        Value::Null => Ok(()),
        leaf => visit(path, leaf),
    }
}

fn visit_mapping<F>(map: &mut Mapping, path: &mut Vec<String>, visit: &mut F) -> Result<(), TreeError>
where
    F: FnMut(&[String], &mut Value) -> Result<(), TreeError>,
{
    for (key, child) in map.iter_mut() {
        path.push(key_to_string(key));
        let result = visit_leaves(child, path, visit);
        path.pop();
        result?;
    }
    Ok(())
}

impl Tree {
    pub fn new(branches: Mapping, metadata: Metadata, file_path: impl Into<PathBuf>) -> Self {
        Self {
            branches,
            metadata,
            file_path: file_path.into(),
        }
    }

    /// Encrypt the selected leaves in place; returns the plaintext MAC as hex.
    pub fn encrypt(&mut self, data_key: &[u8], cipher: &Cipher) -> Result<String, TreeError> {
        let selector = FieldSelector::from_metadata(&self.metadata)?;
        let mac_only_encrypted = self.metadata.mac_only_encrypted;
        let mut hasher = Sha512::new();

        visit_mapping(&mut self.branches, &mut Vec::new(), &mut |path, leaf| {
            let encrypt = selector.should_encrypt(path);
            if encrypt || !mac_only_encrypted {
                hasher.update(plaintext_bytes(leaf));
            }
            if encrypt {
                let encrypted = cipher
                    .encrypt(leaf, data_key, &additional_data(path))
                    .map_err(|source| TreeError::Encrypt {
                        path: path.join(":"),
                        source,
                    })?;
                *leaf = Value::String(encrypted);
            }
            Ok(())
        })?;

        Ok(hex::encode_upper(hasher.finalize()))
    }

    /// Decrypt the selected leaves in place; returns the plaintext MAC as hex.
    pub fn decrypt(&mut self, data_key: &[u8], cipher: &Cipher) -> Result<String, TreeError> {
        let selector = FieldSelector::from_metadata(&self.metadata)?;
        let mac_only_encrypted = self.metadata.mac_only_encrypted;
        let mut hasher = Sha512::new();

        visit_mapping(&mut self.branches, &mut Vec::new(), &mut |path, leaf| {
            let encrypted = selector.should_encrypt(path);
            if encrypted {
                let decrypt_err = |source| TreeError::Decrypt {
                    path: path.join(":"),
                    source,
                };
                let plaintext = match &*leaf {
                    Value::String(s) if is_encrypted(s) => cipher
                        .decrypt(s, data_key, &additional_data(path))
                        .map_err(decrypt_err)?,
                    _ => return Err(decrypt_err(CipherError::MalformedValue)),
                };
                *leaf = plaintext;
            }
            if encrypted || !mac_only_encrypted {
                hasher.update(plaintext_bytes(leaf));
            }
            Ok(())
        })?;

        Ok(hex::encode_upper(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sops::keys::{LocalKeyService, MasterKey};
    use age::x25519;

    fn sample_branches() -> Mapping {
        serde_yaml::from_str(
            "db:\n  user: admin\n  password: hunter2\n  port: 5432\napi_unencrypted: public\nlist:\n  - one\n  - true\nempty: null\n",
        )
        .unwrap()
    }

    fn tree_with(metadata: Metadata) -> Tree {
        Tree::new(sample_branches(), metadata, "secrets/db.yaml")
    }

    fn key_setup(groups: usize) -> (LocalKeyService, Vec<KeyGroup>) {
        let identities: Vec<x25519::Identity> =
            (0..groups).map(|_| x25519::Identity::generate()).collect();
        let key_groups = identities
            .iter()
            .map(|i| vec![MasterKey::new(i.to_public().to_string())])
            .collect();
        (LocalKeyService::new(identities), key_groups)
    }

    #[test]
    fn encrypts_and_decrypts_selected_fields() {
        let metadata = Metadata {
            unencrypted_suffix: Some("_unencrypted".to_string()),
            ..Metadata::default()
        };
        let mut tree = tree_with(metadata);
        let key = [9u8; KEY_LENGTH];
        let cipher = Cipher::new();

        let mac = tree.encrypt(&key, &cipher).unwrap();
        let db = tree.branches["db"].as_mapping().unwrap();
        assert!(is_encrypted(db["password"].as_str().unwrap()));
        assert!(is_encrypted(db["port"].as_str().unwrap()));
        assert_eq!(tree.branches["api_unencrypted"], Value::from("public"));
        assert_eq!(tree.branches["empty"], Value::Null);

        let decrypted_mac = tree.decrypt(&key, &cipher).unwrap();
        assert_eq!(mac, decrypted_mac);
        assert_eq!(tree.branches, sample_branches());
    }

    #[test]
    fn encrypted_regex_limits_encryption() {
        let metadata = Metadata {
            encrypted_regex: Some("^pass".to_string()),
            ..Metadata::default()
        };
        let mut tree = tree_with(metadata);
        tree.encrypt(&[1u8; KEY_LENGTH], &Cipher::new()).unwrap();

        let db = tree.branches["db"].as_mapping().unwrap();
        assert!(is_encrypted(db["password"].as_str().unwrap()));
        assert_eq!(db["user"], Value::from("admin"));
        assert_eq!(tree.branches["list"][0], Value::from("one"));
    }

    #[test]
    fn decrypt_rejects_plaintext_where_ciphertext_expected() {
        let mut tree = tree_with(Metadata::default());
        let err = tree.decrypt(&[1u8; KEY_LENGTH], &Cipher::new()).unwrap_err();
        assert!(matches!(err, TreeError::Decrypt { .. }));
    }

    #[test]
    fn generate_data_key_requires_key_groups() {
        let mut metadata = Metadata::default();
        let err = metadata
            .generate_data_key(&LocalKeyService::default())
            .unwrap_err();
        assert!(matches!(err.0.as_slice(), [DataKeyError::NoKeyGroups]));
    }

    #[test]
    fn data_key_round_trips_through_single_group() {
        let (service, key_groups) = key_setup(1);
        let mut metadata = Metadata {
            key_groups,
            ..Metadata::default()
        };
        let data_key = metadata.generate_data_key(&service).unwrap();
        assert_eq!(data_key.len(), KEY_LENGTH);
        assert_eq!(metadata.get_data_key(&service).unwrap(), data_key);
    }

    #[test]
    fn data_key_uses_shamir_across_groups() {
        let (service, key_groups) = key_setup(3);
        let mut metadata = Metadata {
            key_groups,
            shamir_threshold: 2,
            ..Metadata::default()
        };
        let data_key = metadata.generate_data_key(&service).unwrap();

        // Lose the first group's key material entirely.
        metadata.key_groups[0][0].enc = String::new();
        assert_eq!(metadata.get_data_key(&service).unwrap(), data_key);

        metadata.key_groups[1][0].enc = String::new();
        let err = metadata.get_data_key(&service).unwrap_err();
        assert!(err
            .0
            .iter()
            .any(|e| matches!(e, DataKeyError::ThresholdNotMet { recovered: 1, threshold: 2 })));
    }

    #[test]
    fn generate_collects_every_failing_master_key() {
        let (service, mut key_groups) = key_setup(1);
        key_groups[0].push(MasterKey::new("age1bogus"));
        key_groups[0].push(MasterKey::new("also-bogus"));
        let mut metadata = Metadata {
            key_groups,
            ..Metadata::default()
        };

        let err = metadata.generate_data_key(&service).unwrap_err();
        assert_eq!(err.0.len(), 2);
        assert!(err.to_string().contains("age1bogus"));
    }
}
