// src/utils/input.rs
//! Turns raw JSON bytes into a `RecordSet`.
//!
//! Accepted shapes: an array of objects (ids assigned by position), or an object
//! keyed by integer id. Scalar values are stringified and `null` becomes an empty
//! string; nested arrays or objects are rejected.

use log::{debug, info};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{DedupeError, Result};
use crate::models::{Record, RecordId, RecordSet};

pub fn load_records_from_path(path: &Path) -> Result<RecordSet> {
    let bytes = std::fs::read(path)?;
    info!("Read {} bytes from {}", bytes.len(), path.display());
    load_records_from_bytes(&bytes)
}

pub fn load_records_from_bytes(bytes: &[u8]) -> Result<RecordSet> {
    let text = String::from_utf8(bytes.to_vec())?;
    let value: JsonValue = serde_json::from_str(&text)?;

    let mut records = RecordSet::new();
    match value {
        JsonValue::Array(rows) => {
            for (idx, row) in rows.into_iter().enumerate() {
                let (record, order) = record_from_value(RecordId(idx as u64), row)?;
                records.insert_ordered(record, &order);
            }
        }
        JsonValue::Object(rows) => {
            for (key, row) in rows {
                let id = key.trim().parse::<u64>().map_err(|_| {
                    DedupeError::processing(format!("Record key '{}' is not an integer id", key))
                })?;
                let (record, order) = record_from_value(RecordId(id), row)?;
                if !records.insert_ordered(record, &order) {
                    return Err(DedupeError::processing(format!("Duplicate record id {}", id)));
                }
            }
        }
        _ => {
            return Err(DedupeError::processing(
                "Expected an array of records or an object keyed by record id",
            ))
        }
    }

    debug!(
        "Loaded {} records with columns {:?}",
        records.len(),
        records.columns()
    );
    Ok(records)
}

/// The record plus its field names in source order.
fn record_from_value(id: RecordId, value: JsonValue) -> Result<(Record, Vec<String>)> {
    let object: Map<String, JsonValue> = match value {
        JsonValue::Object(map) => map,
        other => {
            return Err(DedupeError::processing(format!(
                "Record {} is not an object: {}",
                id, other
            )))
        }
    };

    let mut fields = BTreeMap::new();
    let mut order = Vec::with_capacity(object.len());
    for (name, field_value) in object {
        let text = match field_value {
            JsonValue::String(s) => s,
            JsonValue::Null => String::new(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Array(_) | JsonValue::Object(_) => {
                return Err(DedupeError::processing(format!(
                    "Field '{}' of record {} is not a string",
                    name, id
                )))
            }
        };
        order.push(name.clone());
        fields.insert(name, text);
    }
    Ok((Record::new(id, fields), order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_array_input_assigns_positional_ids() {
        let bytes = br#"[{"name": "Jon Smith", "age": 41}, {"name": "John Smith", "age": null}]"#;
        let records = load_records_from_bytes(bytes).unwrap();
        assert_eq!(records.len(), 2);
        let first = records.get(RecordId(0)).unwrap();
        assert_eq!(first.get("name"), Some("Jon Smith"));
        assert_eq!(first.get("age"), Some("41"));
        assert_eq!(records.get(RecordId(1)).unwrap().get("age"), Some(""));
    }

    #[test]
    fn test_columns_keep_first_appearance_order() {
        let bytes = br#"[{"zeta": "1", "alpha": "2"}, {"beta": "3", "alpha": "4"}]"#;
        let records = load_records_from_bytes(bytes).unwrap();
        assert_eq!(records.columns(), &["zeta", "alpha", "beta"]);
    }

    #[test]
    fn test_object_input_uses_keys_as_ids() {
        let bytes = br#"{"10": {"name": "A"}, "3": {"name": "B"}}"#;
        let records = load_records_from_bytes(bytes).unwrap();
        assert!(records.contains(RecordId(10)));
        assert!(records.contains(RecordId(3)));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let bytes = [b'[', b'{', b'"', b'n', b'"', b':', b'"', 0xe9, b'"', b'}', b']'];
        let err = load_records_from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, DedupeError::Decode { .. }));
    }

    #[test]
    fn test_nested_values_and_bad_keys_are_rejected() {
        let nested = br#"[{"name": {"first": "Jon"}}]"#;
        assert!(matches!(
            load_records_from_bytes(nested),
            Err(DedupeError::Processing(_))
        ));

        let bad_key = br#"{"abc": {"name": "Jon"}}"#;
        assert!(matches!(
            load_records_from_bytes(bad_key),
            Err(DedupeError::Processing(_))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "Unrelated Corp"}}]"#).unwrap();
        let records = load_records_from_path(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records.columns(), &["name".to_string()]);
    }
}
