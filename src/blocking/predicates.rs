// src/blocking/predicates.rs
use std::collections::BTreeSet;

use crate::matching::normalize::{normalize_value, tokenize};
use crate::models::{FieldKind, FieldSet, Record};

pub const PREFIX_LENGTH: usize = 3;
/// Marks the whole-value key of a field.
pub const FULL_VALUE_TAG: &str = "|full|";

/// Cheap blocking keys for one field value. Keys are namespaced by field name so
/// equal tokens in different columns never share a block.
pub fn field_predicates(field: &str, kind: FieldKind, raw_value: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    let normalized = normalize_value(raw_value);
    if normalized.is_empty() {
        return keys;
    }

    keys.insert(format!("{}{}{}", field, FULL_VALUE_TAG, normalized));
    if kind == FieldKind::Exact {
        return keys;
    }

    let tokens = tokenize(&normalized);
    for token in &tokens {
        keys.insert(format!("{}|tok|{}", field, token));
        if token.chars().count() >= PREFIX_LENGTH {
            let prefix: String = token.chars().take(PREFIX_LENGTH).collect();
            keys.insert(format!("{}|pre|{}", field, prefix));
        }
    }

    if tokens.len() >= 2 {
        let mut initials: Vec<char> = tokens.iter().filter_map(|t| t.chars().next()).collect();
        initials.sort_unstable();
        let initials: String = initials.into_iter().collect();
        keys.insert(format!("{}|initials|{}", field, initials));
    }

    keys
}

/// Union of the predicates of every configured field of a record.
pub fn record_predicates(record: &Record, fields: &FieldSet) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for field in fields.fields() {
        if let Some(value) = record.get(&field.name) {
            keys.extend(field_predicates(&field.name, field.kind, value));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_predicates() {
        let keys = field_predicates("name", FieldKind::String, "John Smith");
        assert!(keys.contains("name|full|john smith"));
        assert!(keys.contains("name|tok|john"));
        assert!(keys.contains("name|tok|smith"));
        assert!(keys.contains("name|pre|joh"));
        assert!(keys.contains("name|pre|smi"));
        assert!(keys.contains("name|initials|js"));
    }

    #[test]
    fn test_typo_variants_share_predicates() {
        let a = field_predicates("name", FieldKind::String, "Jon Smith");
        let b = field_predicates("name", FieldKind::String, "John Smith");
        assert!(a.intersection(&b).count() >= 2);
    }

    #[test]
    fn test_exact_and_empty_fields() {
        let keys = field_predicates("zip", FieldKind::Exact, "98101");
        assert_eq!(keys.len(), 1);
        assert!(field_predicates("zip", FieldKind::Exact, "  ").is_empty());
    }
}
