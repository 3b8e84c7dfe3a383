// src/matching/comparator.rs
use std::collections::HashSet;
use strsim::normalized_levenshtein;

use crate::error::{DedupeError, Result};
use crate::matching::normalize::{normalize_value, tokenize};
use crate::models::{CandidatePair, FeatureVector, FieldKind, FieldSet, Record, RecordSet};

/// Scores a record pair field by field. Holds no mutable state, so the same pair
/// always yields the same vector.
#[derive(Debug, Clone)]
pub struct Comparator {
    fields: FieldSet,
    signature: String,
}

impl Comparator {
    pub fn new(fields: FieldSet) -> Self {
        let signature = fields.signature();
        Self { fields, signature }
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Signature of the field set; part of every feature cache key.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn feature_count(&self) -> usize {
        self.fields.len()
    }

    pub fn compare(&self, a: &Record, b: &Record) -> FeatureVector {
        self.fields
            .fields()
            .iter()
            .map(|field| {
                field_similarity(
                    field.kind,
                    a.get(&field.name).unwrap_or(""),
                    b.get(&field.name).unwrap_or(""),
                )
            })
            .collect()
    }

    pub fn compare_pair(&self, records: &RecordSet, pair: &CandidatePair) -> Result<FeatureVector> {
        let a = records
            .get(pair.first())
            .ok_or_else(|| DedupeError::processing(format!("Unknown record {}", pair.first())))?;
        let b = records
            .get(pair.second())
            .ok_or_else(|| DedupeError::processing(format!("Unknown record {}", pair.second())))?;
        Ok(self.compare(a, b))
    }
}

/// Similarity in [0, 1]. A missing value on either side scores 0.
pub fn field_similarity(kind: FieldKind, a: &str, b: &str) -> f64 {
    let na = normalize_value(a);
    let nb = normalize_value(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }

    match kind {
        FieldKind::String => normalized_levenshtein(&na, &nb),
        FieldKind::Exact => {
            if na == nb {
                1.0
            } else {
                0.0
            }
        }
        FieldKind::Text => {
            let ta: HashSet<String> = tokenize(&na).into_iter().collect();
            let tb: HashSet<String> = tokenize(&nb).into_iter().collect();
            // Values made only of very short tokens have no token set to compare.
            if ta.is_empty() && tb.is_empty() {
                return if na == nb { 1.0 } else { 0.0 };
            }
            let union = ta.union(&tb).count();
            ta.intersection(&tb).count() as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDefinition, RecordId};
    use std::collections::BTreeMap;

    fn record(id: u64, pairs: &[(&str, &str)]) -> Record {
        let fields: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Record::new(RecordId(id), fields)
    }

    #[test]
    fn test_compare_is_deterministic() {
        let comparator = Comparator::new(FieldSet::new(vec![
            FieldDefinition::string("name"),
            FieldDefinition::exact("zip"),
            FieldDefinition::text("notes"),
        ]));
        let a = record(0, &[("name", "Jon Smith"), ("zip", "98101"), ("notes", "blue house corner")]);
        let b = record(1, &[("name", "John Smith"), ("zip", "98101"), ("notes", "corner house")]);

        let first = comparator.compare(&a, &b);
        let second = comparator.compare(&a, &b);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|s| (0.0..=1.0).contains(s)));
        assert_eq!(first[1], 1.0);
        assert!((first[2] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_similar_names_score_higher_than_unrelated() {
        let close = field_similarity(FieldKind::String, "Jon Smith", "John Smith");
        let far = field_similarity(FieldKind::String, "Jon Smith", "Unrelated Corp");
        assert!(close > 0.85);
        assert!(far < 0.3);
        assert_eq!(field_similarity(FieldKind::String, "ACME", "acme."), 1.0);
    }

    #[test]
    fn test_missing_values_score_zero() {
        assert_eq!(field_similarity(FieldKind::String, "", "John"), 0.0);
        assert_eq!(field_similarity(FieldKind::Exact, "", ""), 0.0);
        assert_eq!(field_similarity(FieldKind::Text, "", "a"), 0.0);
    }

    #[test]
    fn test_text_of_short_tokens_falls_back_to_equality() {
        assert_eq!(field_similarity(FieldKind::Text, "A B", "A B"), 1.0);
        assert_eq!(field_similarity(FieldKind::Text, "x", "x"), 1.0);
        assert_eq!(field_similarity(FieldKind::Text, "3", "4"), 0.0);
        assert_eq!(field_similarity(FieldKind::Text, "x", "blue house"), 0.0);
    }

    #[test]
    fn test_compare_pair_unknown_record() {
        let comparator = Comparator::new(FieldSet::new(vec![FieldDefinition::string("name")]));
        let records: RecordSet = vec![record(0, &[("name", "A")])].into_iter().collect();
        let pair = CandidatePair::new(RecordId(0), RecordId(9));
        assert!(matches!(
            comparator.compare_pair(&records, &pair),
            Err(DedupeError::Processing(_))
        ));
    }
}
