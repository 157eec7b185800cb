use serde_yaml::{Mapping, Value};

use super::{into_mapping, split_metadata, with_metadata, Store, StoreError};
use crate::sops::tree::Tree;

/// JSON documents, emitted pretty-printed.
pub struct JsonStore;

impl JsonStore {
    fn parse(bytes: &[u8]) -> Result<Value, StoreError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    fn emit(value: &Value) -> Result<Vec<u8>, StoreError> {
        let mut out = serde_json::to_vec_pretty(value)?;
        out.push(b'\n');
        Ok(out)
    }
}

impl Store for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load_plain_file(&self, bytes: &[u8]) -> Result<Mapping, StoreError> {
        into_mapping(Self::parse(bytes)?)
    }

    fn load_encrypted_file(&self, bytes: &[u8]) -> Result<Tree, StoreError> {
        split_metadata(Self::parse(bytes)?)
    }

    fn emit_plain_file(&self, branches: &Mapping) -> Result<Vec<u8>, StoreError> {
        Self::emit(&Value::Mapping(branches.clone()))
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>, StoreError> {
        Self::emit(&with_metadata(tree)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sops::tree::Metadata;

    #[test]
    fn plain_round_trip() {
        let input = br#"{"b": {"x": [1, 2.5, true, null]}, "a": "text"}"#;
        let branches = JsonStore.load_plain_file(input).unwrap();
        let keys: Vec<&str> = branches.keys().filter_map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);

        let emitted = JsonStore.emit_plain_file(&branches).unwrap();
        let reparsed: serde_json::Value = serde_json::from_slice(&emitted).unwrap();
        let original: serde_json::Value = serde_json::from_slice(input).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn encrypted_round_trip() {
        let branches = JsonStore.load_plain_file(br#"{"token": "abc"}"#).unwrap();
        let metadata = Metadata {
            version: "0.1.0".to_string(),
            ..Metadata::default()
        };
        let tree = Tree::new(branches, metadata, "");

        let emitted = JsonStore.emit_encrypted_file(&tree).unwrap();
        let loaded = JsonStore.load_encrypted_file(&emitted).unwrap();
        assert_eq!(loaded.branches, tree.branches);
        assert_eq!(loaded.metadata, tree.metadata);

        assert!(matches!(
            JsonStore.load_encrypted_file(br#"{"token": "abc"}"#),
            Err(StoreError::MetadataNotFound)
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            JsonStore.load_plain_file(b"{not json"),
            Err(StoreError::Json(_))
        ));
        assert!(matches!(
            JsonStore.load_plain_file(b"[1, 2]"),
            Err(StoreError::NotAMapping)
        ));
    }
}
