//! Master keys and the key service that wraps/unwraps data keys with them.
//!
//! Master keys are age X25519 recipients. A wrapped data key is stored as an
//! ASCII-armored age message next to the recipient it was encrypted to.
//!
//! Identities for unwrapping are resolved locally, in order:
//! - `SOPS_AGE_KEY` environment variable (one or more `AGE-SECRET-KEY-...` lines)
//! - `SOPS_AGE_KEY_FILE` pointing at a key file
//! - `$XDG_CONFIG_HOME/sops/age/keys.txt`, falling back to `~/.config/sops/age/keys.txt`

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::x25519;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::config_home;

/// Environment variable holding age identities inline.
pub const AGE_KEY_ENV: &str = "SOPS_AGE_KEY";

/// Environment variable pointing at an age identity file.
pub const AGE_KEY_FILE_ENV: &str = "SOPS_AGE_KEY_FILE";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid age recipient {recipient:?}: {reason}")]
    InvalidRecipient { recipient: String, reason: String },
    #[error("failed to encrypt data key for {recipient}: {reason}")]
    Wrap { recipient: String, reason: String },
    #[error("master key {0} holds no encrypted data key")]
    NotWrapped(String),
    #[error("no age identities available to decrypt the data key")]
    NoIdentities,
    #[error("failed to decrypt data key for {recipient}: {reason}")]
    Unwrap { recipient: String, reason: String },
    #[error("invalid age identity: {0}")]
    InvalidIdentity(String),
    #[error("cannot read age key file {path:?}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One age recipient plus the data key (or key share) wrapped for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    pub recipient: String,
    #[serde(default)]
    pub enc: String,
}

impl MasterKey {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            enc: String::new(),
        }
    }
}

/// A set of master keys; any one of them can unwrap the group's key material.
pub type KeyGroup = Vec<MasterKey>;

/// Wraps and unwraps data keys for master keys.
pub trait KeyService {
    /// Encrypt `data_key` for `key`, returning the value to store in `enc`.
    fn encrypt(&self, key: &MasterKey, data_key: &[u8]) -> Result<String, KeyError>;

    /// Recover the data key stored in `key.enc`.
    fn decrypt(&self, key: &MasterKey) -> Result<Vec<u8>, KeyError>;
}

/// Key service backed by locally available age identities.
#[derive(Default)]
pub struct LocalKeyService {
    identities: Vec<x25519::Identity>,
}

impl LocalKeyService {
    pub fn new(identities: Vec<x25519::Identity>) -> Self {
        Self { identities }
    }

    /// Collect identities from the environment and the default key file.
    ///
    /// Sources that cannot be read or parsed are logged and skipped so that
    /// encryption, which needs no identity, still works.
    pub fn from_env() -> Self {
        let mut identities = Vec::new();

        if let Ok(inline) = std::env::var(AGE_KEY_ENV) {
            match parse_identities(&inline) {
                Ok(mut parsed) => identities.append(&mut parsed),
                Err(e) => warn!("Ignoring {}: {}", AGE_KEY_ENV, e),
            }
        }

        let key_file = std::env::var(AGE_KEY_FILE_ENV)
            .map(PathBuf::from)
            .ok()
            .or_else(default_key_file);
        if let Some(path) = key_file {
            match read_identity_file(&path) {
                Ok(mut parsed) => identities.append(&mut parsed),
                Err(e) => debug!("Skipping age key file {}: {}", path.display(), e),
            }
        }

        debug!("Loaded {} local age identities", identities.len());
        Self { identities }
    }
}

impl KeyService for LocalKeyService {
    fn encrypt(&self, key: &MasterKey, data_key: &[u8]) -> Result<String, KeyError> {
        let recipient = x25519::Recipient::from_str(key.recipient.trim()).map_err(|e| {
            KeyError::InvalidRecipient {
                recipient: key.recipient.clone(),
                reason: e.to_string(),
            }
        })?;
        let wrap_err = |reason: String| KeyError::Wrap {
            recipient: key.recipient.clone(),
            reason,
        };

        let encryptor = age::Encryptor::with_recipients(vec![
            Box::new(recipient) as Box<dyn age::Recipient + Send>
        ])
        .ok_or_else(|| wrap_err("no recipients".to_string()))?;

        let mut out = Vec::new();
        let armored = ArmoredWriter::wrap_output(&mut out, Format::AsciiArmor)
            .map_err(|e| wrap_err(e.to_string()))?;
        let mut writer = encryptor
            .wrap_output(armored)
            .map_err(|e| wrap_err(e.to_string()))?;
        writer
            .write_all(data_key)
            .map_err(|e| wrap_err(e.to_string()))?;
        writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(|e| wrap_err(e.to_string()))?;

        String::from_utf8(out).map_err(|e| wrap_err(e.to_string()))
    }

    fn decrypt(&self, key: &MasterKey) -> Result<Vec<u8>, KeyError> {
        if key.enc.trim().is_empty() {
            return Err(KeyError::NotWrapped(key.recipient.clone()));
        }
        if self.identities.is_empty() {
            return Err(KeyError::NoIdentities);
        }
        let unwrap_err = |reason: String| KeyError::Unwrap {
            recipient: key.recipient.clone(),
            reason,
        };

        let decryptor = match age::Decryptor::new(ArmoredReader::new(key.enc.as_bytes()))
            .map_err(|e| unwrap_err(e.to_string()))?
        {
            age::Decryptor::Recipients(d) => d,
            _ => return Err(unwrap_err("data key is passphrase-encrypted".to_string())),
        };

        let mut reader = decryptor
            .decrypt(self.identities.iter().map(|i| i as &dyn age::Identity))
            .map_err(|e| unwrap_err(e.to_string()))?;
        let mut data_key = Vec::new();
        reader
            .read_to_end(&mut data_key)
            .map_err(|e| unwrap_err(e.to_string()))?;
        Ok(data_key)
    }
}

/// Parse identities from key-file text. Blank lines and `#` comments are skipped.
pub fn parse_identities(text: &str) -> Result<Vec<x25519::Identity>, KeyError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            x25519::Identity::from_str(line).map_err(|e| KeyError::InvalidIdentity(e.to_string()))
        })
        .collect()
}

fn read_identity_file(path: &Path) -> Result<Vec<x25519::Identity>, KeyError> {
    let text = std::fs::read_to_string(path).map_err(|source| KeyError::KeyFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_identities(&text)
}

fn default_key_file() -> Option<PathBuf> {
    let path = config_home().join("sops").join("age").join("keys.txt");
    path.exists().then_some(path)
}
