//! Stores convert between file bytes and [`Tree`]s.
//!
//! The store is chosen from the file extension:
//!
//! ```text
//! .yaml / .yml  -> YamlStore
//! .json         -> JsonStore
//! .env          -> DotenvStore
//! anything else -> BinaryStore (whole file under the `data` key)
//! ```

mod binary;
mod dotenv;
mod json;
pub mod metadata;
mod yaml;

pub use binary::BinaryStore;
pub use dotenv::DotenvStore;
pub use json::JsonStore;
pub use yaml::YamlStore;

use std::path::Path;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use super::tree::Tree;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The document parsed but carries no encryption metadata.
    #[error("sops metadata not found")]
    MetadataNotFound,
    #[error("invalid sops metadata: {0}")]
    InvalidMetadata(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document root must be a mapping")]
    NotAMapping,
    #[error("invalid dotenv line {line}: {content:?}")]
    InvalidDotenvLine { line: usize, content: String },
    #[error("file content is not valid UTF-8")]
    InvalidUtf8,
    #[error("cannot represent value at {0:?} in this format")]
    Unsupported(String),
}

/// Parses and emits one file format, in plaintext and encrypted form.
pub trait Store {
    /// Short format name used in log output.
    fn name(&self) -> &'static str;

    /// Parse an unencrypted document.
    fn load_plain_file(&self, bytes: &[u8]) -> Result<Mapping, StoreError>;

    /// Parse an encrypted document. Returns [`StoreError::MetadataNotFound`]
    /// when the document has no metadata at all.
    fn load_encrypted_file(&self, bytes: &[u8]) -> Result<Tree, StoreError>;

    fn emit_plain_file(&self, branches: &Mapping) -> Result<Vec<u8>, StoreError>;

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>, StoreError>;
}

/// Pick the store for a path based on its extension.
pub fn store_for_path(path: &Path) -> Box<dyn Store> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "yaml" | "yml" => Box::new(YamlStore),
        "json" => Box::new(JsonStore),
        "env" => Box::new(DotenvStore),
        _ => Box::new(BinaryStore),
    }
}

/// Accept a mapping root; an empty document counts as an empty mapping.
fn into_mapping(value: Value) -> Result<Mapping, StoreError> {
    match value {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(StoreError::NotAMapping),
    }
}

/// Split the metadata key off a parsed document.
fn split_metadata(value: Value) -> Result<Tree, StoreError> {
    let mut branches = into_mapping(value)?;
    let stored = branches
        .shift_remove(metadata::METADATA_KEY)
        .ok_or(StoreError::MetadataNotFound)?;
    let metadata = metadata::metadata_from_value(stored)?;
    Ok(Tree::new(branches, metadata, ""))
}

/// Document with the metadata appended under the `sops` key.
fn with_metadata(tree: &Tree) -> Result<Value, StoreError> {
    let mut document = tree.branches.clone();
    document.insert(
        Value::from(metadata::METADATA_KEY),
        metadata::metadata_to_value(&tree.metadata)?,
    );
    Ok(Value::Mapping(document))
}
