use serde_yaml::{Mapping, Value};

use super::metadata::{metadata_from_value, metadata_to_value, METADATA_KEY};
use super::{Store, StoreError};
use crate::sops::tree::Tree;

const MAP_SEPARATOR: &str = "__map_";
const LIST_SEPARATOR: &str = "__list_";

/// `KEY=VALUE` files. Metadata is flattened into `sops_*` keys.
pub struct DotenvStore;

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_lines(bytes: &[u8]) -> Result<Vec<(String, String)>, StoreError> {
    let text = std::str::from_utf8(bytes).map_err(|_| StoreError::InvalidUtf8)?;
    let mut pairs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_start();
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = || StoreError::InvalidDotenvLine {
            line: idx + 1,
            content: raw.to_string(),
        };
        let (key, value) = line.split_once('=').ok_or_else(invalid)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid());
        }
        pairs.push((key.to_string(), unescape(value)));
    }
    Ok(pairs)
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String, StoreError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(StoreError::Unsupported(key.to_string())),
    }
}

fn emit_lines(lines: &[(String, String)]) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in lines {
        out.push_str(key);
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out.into_bytes()
}

fn branches_to_lines(branches: &Mapping) -> Result<Vec<(String, String)>, StoreError> {
    branches
        .iter()
        .map(|(key, value)| {
            let key = key
                .as_str()
                .ok_or_else(|| StoreError::Unsupported(format!("{:?}", key)))?;
            Ok((key.to_string(), scalar_to_string(key, value)?))
        })
        .collect()
}

/// Flatten nested metadata into `prefix__map_key` / `prefix__list_N` pairs.
fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) -> Result<(), StoreError> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let key = key
                    .as_str()
                    .ok_or_else(|| StoreError::Unsupported(prefix.to_string()))?;
                flatten(&format!("{prefix}{MAP_SEPARATOR}{key}"), child, out)?;
            }
            Ok(())
        }
        Value::Sequence(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(&format!("{prefix}{LIST_SEPARATOR}{idx}"), child, out)?;
            }
            Ok(())
        }
        scalar => {
            out.push((prefix.to_string(), scalar_to_string(prefix, scalar)?));
            Ok(())
        }
    }
}

enum Segment {
    Key(String),
    Index(usize),
}

/// Split at the first map/list separator, if any.
fn split_at_separator(s: &str) -> (&str, Option<&str>) {
    let next = [s.find(MAP_SEPARATOR), s.find(LIST_SEPARATOR)]
        .into_iter()
        .flatten()
        .min();
    match next {
        Some(pos) => (&s[..pos], Some(&s[pos..])),
        None => (s, None),
    }
}

fn segments(flat_key: &str) -> Result<Vec<Segment>, StoreError> {
    let invalid = || StoreError::InvalidMetadata(format!("malformed metadata key {flat_key:?}"));

    let (first, mut rest) = split_at_separator(flat_key);
    let mut out = vec![Segment::Key(first.to_string())];
    while let Some(remaining) = rest {
        if let Some(after) = remaining.strip_prefix(MAP_SEPARATOR) {
            let (segment, next) = split_at_separator(after);
            out.push(Segment::Key(segment.to_string()));
            rest = next;
        } else if let Some(after) = remaining.strip_prefix(LIST_SEPARATOR) {
            let (segment, next) = split_at_separator(after);
            out.push(Segment::Index(segment.parse().map_err(|_| invalid())?));
            rest = next;
        } else {
            return Err(invalid());
        }
    }
    Ok(out)
}

fn insert_at(target: &mut Value, path: &[Segment], value: String) -> Result<(), StoreError> {
    let Some((head, tail)) = path.split_first() else {
        *target = Value::String(value);
        return Ok(());
    };

    let child = match head {
        Segment::Key(key) => {
            if !target.is_mapping() {
                *target = Value::Mapping(Mapping::new());
            }
            let map = target
                .as_mapping_mut()
                .ok_or_else(|| StoreError::InvalidMetadata(key.clone()))?;
            map.entry(Value::from(key.as_str())).or_insert(Value::Null)
        }
        Segment::Index(idx) => {
            if !target.is_sequence() {
                *target = Value::Sequence(Vec::new());
            }
            let items = target
                .as_sequence_mut()
                .ok_or_else(|| StoreError::InvalidMetadata(idx.to_string()))?;
            if items.len() <= *idx {
                items.resize(*idx + 1, Value::Null);
            }
            &mut items[*idx]
        }
    };
    insert_at(child, tail, value)
}

fn unflatten(pairs: &[(String, String)]) -> Result<Value, StoreError> {
    let mut root = Value::Mapping(Mapping::new());
    for (flat_key, value) in pairs {
        insert_at(&mut root, &segments(flat_key)?, value.clone())?;
    }
    Ok(root)
}

impl Store for DotenvStore {
    fn name(&self) -> &'static str {
        "env"
    }

    fn load_plain_file(&self, bytes: &[u8]) -> Result<Mapping, StoreError> {
        Ok(parse_lines(bytes)?
            .into_iter()
            .map(|(key, value)| (Value::String(key), Value::String(value)))
            .collect())
    }

    fn load_encrypted_file(&self, bytes: &[u8]) -> Result<Tree, StoreError> {
        let prefix = format!("{METADATA_KEY}_");
        let mut branches = Mapping::new();
        let mut metadata_pairs = Vec::new();

        for (key, value) in parse_lines(bytes)? {
            match key.strip_prefix(&prefix) {
                Some(flat_key) => metadata_pairs.push((flat_key.to_string(), value)),
                None => {
                    branches.insert(Value::String(key), Value::String(value));
                }
            }
        }

        if metadata_pairs.is_empty() {
            return Err(StoreError::MetadataNotFound);
        }
        let metadata = metadata_from_value(unflatten(&metadata_pairs)?)?;
        Ok(Tree::new(branches, metadata, ""))
    }

    fn emit_plain_file(&self, branches: &Mapping) -> Result<Vec<u8>, StoreError> {
        Ok(emit_lines(&branches_to_lines(branches)?))
    }

    fn emit_encrypted_file(&self, tree: &Tree) -> Result<Vec<u8>, StoreError> {
        let mut lines = branches_to_lines(&tree.branches)?;

        let metadata = metadata_to_value(&tree.metadata)?;
        let map = metadata
            .as_mapping()
            .ok_or_else(|| StoreError::InvalidMetadata("metadata is not a mapping".to_string()))?;
        for (key, value) in map {
            let key = key
                .as_str()
                .ok_or_else(|| StoreError::InvalidMetadata(format!("{:?}", key)))?;
            flatten(&format!("{METADATA_KEY}_{key}"), value, &mut lines)?;
        }

        Ok(emit_lines(&lines))
    }
}
