use serde_yaml::{Mapping, Value};

use super::{into_mapping, split_metadata, with_metadata, Store, StoreError};
use crate::sops::tree::Tree;

/// YAML documents. Comments are not preserved.
pub struct YamlStore;

impl YamlStore {
    fn parse(bytes: &[u8]) -> Result<Value, StoreError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_yaml::from_slice(bytes)?)
    }
}

impl Store for YamlStore {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn load_plain_file(&self, bytes: &[u8]) -> Result<Mapping, StoreError> {
        into_mapping(Self::parse(bytes)?)
    }

    fn load_encrypted_file(&self, bytes: &[u8]) -> Result<Tree, StoreError> {
        split_metadata(Self::parse(bytes)?)
    }

    fn emit_plain_file(&self, branches: &Mapping) -> Result<Vec<u8>, StoreError> {
        Ok(serde_yaml::to_string(&Value::Mapping(branches.clone()))?.into_bytes())
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>, StoreError> {
        Ok(serde_yaml::to_string(&with_metadata(tree)?)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sops::tree::Metadata;

    #[test]
    fn plain_round_trip_keeps_key_order() {
        let input = b"zeta: 1\nalpha:\n  nested: [a, b]\nmiddle: text\n";
        let branches = YamlStore.load_plain_file(input).unwrap();
        let keys: Vec<&str> = branches.keys().filter_map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "middle"]);

        let emitted = YamlStore.emit_plain_file(&branches).unwrap();
        assert_eq!(YamlStore.load_plain_file(&emitted).unwrap(), branches);
    }

    #[test]
    fn plain_file_is_not_an_encrypted_file() {
        let err = YamlStore.load_encrypted_file(b"password: hunter2\n").unwrap_err();
        assert!(matches!(err, StoreError::MetadataNotFound));
    }

    #[test]
    fn encrypted_document_carries_metadata() {
        let branches = YamlStore.load_plain_file(b"token: abc\n").unwrap();
        let metadata = Metadata {
            version: "0.1.0".to_string(),
            ..Metadata::default()
        };
        let tree = Tree::new(branches, metadata, "secrets/token.yaml");

        let emitted = YamlStore.emit_encrypted_file(&tree).unwrap();
        let text = String::from_utf8(emitted.clone()).unwrap();
        assert!(text.contains("sops:"));

        let loaded = YamlStore.load_encrypted_file(&emitted).unwrap();
        assert_eq!(loaded.branches, tree.branches);
        assert_eq!(loaded.metadata, tree.metadata);
    }

    #[test]
    fn rejects_non_mapping_documents() {
        assert!(matches!(
            YamlStore.load_plain_file(b"- just\n- a list\n"),
            Err(StoreError::NotAMapping)
        ));
        assert!(matches!(
            YamlStore.load_plain_file(b"key: [unterminated\n"),
            Err(StoreError::Yaml(_))
        ));
    }
}
