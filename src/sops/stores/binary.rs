use serde_yaml::{Mapping, Value};

use super::{JsonStore, Store, StoreError};
use crate::sops::tree::Tree;

const DATA_KEY: &str = "data";

/// Arbitrary text files. The whole content is one value under `data`; the
/// encrypted form is a JSON document.
pub struct BinaryStore;

impl Store for BinaryStore {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn load_plain_file(&self, bytes: &[u8]) -> Result<Mapping, StoreError> {
        let text = String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::InvalidUtf8)?;
        let mut branches = Mapping::new();
        branches.insert(Value::from(DATA_KEY), Value::String(text));
        Ok(branches)
    }

    fn load_encrypted_file(&self, bytes: &[u8]) -> Result<Tree, StoreError> {
        // Plain content is rarely valid JSON; that still means "not encrypted".
        match JsonStore.load_encrypted_file(bytes) {
            Err(StoreError::Json(_)) | Err(StoreError::NotAMapping) => {
                Err(StoreError::MetadataNotFound)
            }
            other => other,
        }
    }

    fn emit_plain_file(&self, branches: &Mapping) -> Result<Vec<u8>, StoreError> {
        match branches.get(DATA_KEY) {
            Some(Value::String(text)) => Ok(text.clone().into_bytes()),
            _ => Err(StoreError::Unsupported(DATA_KEY.to_string())),
        }
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>, StoreError> {
        JsonStore.emit_encrypted_file(tree)
    }
}
