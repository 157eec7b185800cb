//! On-disk representation of [`Metadata`] under the `sops` key.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use super::StoreError;
use crate::sops::keys::{KeyGroup, MasterKey};
use crate::sops::tree::Metadata;

/// Top-level key holding the metadata in structured documents.
pub const METADATA_KEY: &str = "sops";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredKeyGroup {
    #[serde(default)]
    pub age: Vec<MasterKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age: Vec<MasterKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_groups: Vec<StoredKeyGroup>,
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "lenient_usize"
    )]
    pub shamir_threshold: usize,
    #[serde(default)]
    pub lastmodified: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_regex: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        deserialize_with = "lenient_bool"
    )]
    pub mac_only_encrypted: bool,
    #[serde(default)]
    pub version: String,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(usize),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrText {
    Bool(bool),
    Text(String),
}

// Flat formats such as dotenv store every scalar as a string.
fn lenient_usize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match BoolOrText::deserialize(deserializer)? {
        BoolOrText::Bool(b) => Ok(b),
        BoolOrText::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

impl From<&Metadata> for StoredMetadata {
    fn from(metadata: &Metadata) -> Self {
        let (age, key_groups) = if metadata.key_groups.len() == 1 {
            (metadata.key_groups[0].clone(), Vec::new())
        } else {
            let groups = metadata
                .key_groups
                .iter()
                .map(|group| StoredKeyGroup { age: group.clone() })
                .collect();
            (Vec::new(), groups)
        };

        Self {
            age,
            key_groups,
            shamir_threshold: if metadata.key_groups.len() > 1 {
                metadata.shamir_threshold
            } else {
                0
            },
            lastmodified: metadata.last_modified_string(),
            mac: metadata.message_authentication_code.clone(),
            unencrypted_suffix: metadata.unencrypted_suffix.clone(),
            encrypted_suffix: metadata.encrypted_suffix.clone(),
            unencrypted_regex: metadata.unencrypted_regex.clone(),
            encrypted_regex: metadata.encrypted_regex.clone(),
            mac_only_encrypted: metadata.mac_only_encrypted,
            version: metadata.version.clone(),
        }
    }
}

impl TryFrom<StoredMetadata> for Metadata {
    type Error = StoreError;

    fn try_from(stored: StoredMetadata) -> Result<Self, Self::Error> {
        if stored.version.trim().is_empty() {
            return Err(StoreError::InvalidMetadata(
                "missing version".to_string(),
            ));
        }

        let last_modified = DateTime::parse_from_rfc3339(stored.lastmodified.trim())
            .map_err(|e| {
                StoreError::InvalidMetadata(format!(
                    "invalid lastmodified {:?}: {}",
                    stored.lastmodified, e
                ))
            })?
            .with_timezone(&Utc);

        let key_groups: Vec<KeyGroup> = if !stored.key_groups.is_empty() {
            stored.key_groups.into_iter().map(|g| g.age).collect()
        } else if !stored.age.is_empty() {
            vec![stored.age]
        } else {
            Vec::new()
        };

        Ok(Metadata {
            key_groups,
            shamir_threshold: stored.shamir_threshold,
            last_modified,
            message_authentication_code: stored.mac,
            unencrypted_suffix: stored.unencrypted_suffix,
            encrypted_suffix: stored.encrypted_suffix,
            unencrypted_regex: stored.unencrypted_regex,
            encrypted_regex: stored.encrypted_regex,
            mac_only_encrypted: stored.mac_only_encrypted,
            version: stored.version,
        })
    }
}

/// Decode a `sops` metadata value taken from a structured document.
pub fn metadata_from_value(value: serde_yaml::Value) -> Result<Metadata, StoreError> {
    let stored: StoredMetadata = serde_yaml::from_value(value)
        .map_err(|e| StoreError::InvalidMetadata(e.to_string()))?;
    Metadata::try_from(stored)
}

/// Encode metadata as a value to place under the `sops` key.
pub fn metadata_to_value(metadata: &Metadata) -> Result<serde_yaml::Value, StoreError> {
    serde_yaml::to_value(StoredMetadata::from(metadata)).map_err(StoreError::Yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sops::tree::now;

    #[test]
    fn single_group_is_stored_flat() {
        let metadata = Metadata {
            key_groups: vec![vec![MasterKey::new("age1abc")]],
            shamir_threshold: 0,
            version: "0.1.0".to_string(),
            unencrypted_suffix: Some("_unencrypted".to_string()),
            ..Metadata::default()
        };
        let value = metadata_to_value(&metadata).unwrap();
        assert!(value.get("age").is_some());
        assert!(value.get("key_groups").is_none());
        assert!(value.get("shamir_threshold").is_none());

        assert_eq!(metadata_from_value(value).unwrap(), metadata);
    }

    #[test]
    fn multiple_groups_keep_threshold() {
        let metadata = Metadata {
            key_groups: vec![vec![MasterKey::new("age1a")], vec![MasterKey::new("age1b")]],
            shamir_threshold: 2,
            last_modified: now(),
            version: "0.1.0".to_string(),
            ..Metadata::default()
        };
        let value = metadata_to_value(&metadata).unwrap();
        assert!(value.get("key_groups").is_some());
        assert_eq!(metadata_from_value(value).unwrap(), metadata);
    }

    #[test]
    fn rejects_missing_version_and_bad_timestamp() {
        let no_version: serde_yaml::Value =
            serde_yaml::from_str("lastmodified: \"2024-01-01T00:00:00Z\"\nmac: x\n").unwrap();
        assert!(matches!(
            metadata_from_value(no_version),
            Err(StoreError::InvalidMetadata(_))
        ));

        let bad_time: serde_yaml::Value =
            serde_yaml::from_str("lastmodified: yesterday\nversion: 0.1.0\n").unwrap();
        assert!(matches!(
            metadata_from_value(bad_time),
            Err(StoreError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn accepts_stringly_typed_scalars() {
        let value: serde_yaml::Value = serde_yaml::from_str(
            "shamir_threshold: \"2\"\nmac_only_encrypted: \"true\"\nlastmodified: \"2024-01-01T00:00:00Z\"\nversion: 0.1.0\n",
        )
        .unwrap();
        let metadata = metadata_from_value(value).unwrap();
        assert_eq!(metadata.shamir_threshold, 2);
        assert!(metadata.mac_only_encrypted);
    }
}
