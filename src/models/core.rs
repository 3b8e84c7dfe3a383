// src/models/core.rs
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Stable identifier assigned to a record at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable mapping from field name to string value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: RecordId, fields: BTreeMap<String, String>) -> Self {
        Self { id, fields }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|s| s.as_str())
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// Records ingested for one session, plus the column names in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: BTreeMap<RecordId, Record>,
    columns: Vec<String>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, returning false if the id was already taken. New
    /// columns are appended in the record's (sorted) field order.
    pub fn insert(&mut self, record: Record) -> bool {
        let order: Vec<String> = record.fields.keys().cloned().collect();
        self.insert_ordered(record, &order)
    }

    /// Like `insert`, but new columns are appended in `column_order`, the order
    /// the fields appeared in the source. Fields missing from `column_order`
    /// follow in sorted order.
    pub fn insert_ordered(&mut self, record: Record, column_order: &[String]) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        let ordered = column_order
            .iter()
            .filter(|c| record.fields.contains_key(*c))
            .chain(record.fields.keys());
        for column in ordered {
            if !self.columns.iter().any(|c| c == column) {
                self.columns.push(column.clone());
            }
        }
        self.records.insert(record.id, record);
        true
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.records.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// How a field is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Normalized edit distance
    String,
    /// Exact equality after normalization
    Exact,
    /// Token set overlap
    Text,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Exact => "exact",
            FieldKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDefinition {
    pub fn string(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::String }
    }

    pub fn exact(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Exact }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Text }
    }
}

/// The ordered comparison fields. Feature vectors follow this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    fields: Vec<FieldDefinition>,
}

impl FieldSet {
    pub fn new(fields: Vec<FieldDefinition>) -> Self {
        Self { fields }
    }

    /// Every column of the record set, compared as strings.
    pub fn all_columns(records: &RecordSet) -> Self {
        Self::new(records.columns().iter().map(FieldDefinition::string).collect())
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stable hex signature of the field names and kinds, used in feature cache keys.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for field in &self.fields {
            hasher.update(field.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(field.kind.as_str().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Unordered pair of record ids, stored with the smaller id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawCandidatePair")]
pub struct CandidatePair {
    lo: RecordId,
    hi: RecordId,
}

/// Wire shape of a pair; ids may arrive in either order.
#[derive(Deserialize)]
struct RawCandidatePair {
    lo: RecordId,
    hi: RecordId,
}

impl From<RawCandidatePair> for CandidatePair {
    fn from(raw: RawCandidatePair) -> Self {
        CandidatePair::new(raw.lo, raw.hi)
    }
}

impl CandidatePair {
    pub fn new(a: RecordId, b: RecordId) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    pub fn first(&self) -> RecordId {
        self.lo
    }

    pub fn second(&self) -> RecordId {
        self.hi
    }

    pub fn is_self_pair(&self) -> bool {
        self.lo == self.hi
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.lo == id || self.hi == id
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lo, self.hi)
    }
}

/// One similarity score in [0, 1] per configured field.
pub type FeatureVector = Vec<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Match,
    Distinct,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Match => "match",
            Label::Distinct => "distinct",
        }
    }
}

/// Accumulated human labels. Pairs are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    #[serde(rename = "match")]
    pub matches: Vec<CandidatePair>,
    pub distinct: Vec<CandidatePair>,
}

impl TrainingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pair: CandidatePair, label: Label) {
        match label {
            Label::Match => self.matches.push(pair),
            Label::Distinct => self.distinct.push(pair),
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len() + self.distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label_of(&self, pair: &CandidatePair) -> Option<Label> {
        if self.matches.contains(pair) {
            Some(Label::Match)
        } else if self.distinct.contains(pair) {
            Some(Label::Distinct)
        } else {
            None
        }
    }

    pub fn labeled_pairs(&self) -> HashSet<CandidatePair> {
        self.matches.iter().chain(self.distinct.iter()).copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CandidatePair, Label)> + '_ {
        self.matches
            .iter()
            .map(|p| (*p, Label::Match))
            .chain(self.distinct.iter().map(|p| (*p, Label::Distinct)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, name: &str) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), name.to_string());
        Record::new(RecordId(id), fields)
    }

    #[test]
    fn test_candidate_pair_is_unordered() {
        let a = CandidatePair::new(RecordId(7), RecordId(3));
        let b = CandidatePair::new(RecordId(3), RecordId(7));
        assert_eq!(a, b);
        assert_eq!(a.first(), RecordId(3));
        assert_eq!(a.second(), RecordId(7));
        assert!(!a.is_self_pair());
        assert!(CandidatePair::new(RecordId(1), RecordId(1)).is_self_pair());
    }

    #[test]
    fn test_record_set_rejects_duplicate_ids_and_tracks_columns() {
        let mut set = RecordSet::new();
        assert!(set.insert(record(0, "Jon Smith")));
        assert!(!set.insert(record(0, "Someone Else")));

        let mut fields = BTreeMap::new();
        fields.insert("city".to_string(), "Seattle".to_string());
        fields.insert("name".to_string(), "Jane".to_string());
        assert!(set.insert(Record::new(RecordId(1), fields)));

        assert_eq!(set.len(), 2);
        assert_eq!(set.columns(), &["name".to_string(), "city".to_string()]);
        assert_eq!(set.get(RecordId(0)).unwrap().get("name"), Some("Jon Smith"));
    }

    #[test]
    fn test_columns_follow_source_order() {
        let mut fields = BTreeMap::new();
        fields.insert("zip".to_string(), "98101".to_string());
        fields.insert("name".to_string(), "Jane".to_string());
        fields.insert("city".to_string(), "Seattle".to_string());

        let mut set = RecordSet::new();
        let order = vec!["zip".to_string(), "name".to_string()];
        assert!(set.insert_ordered(Record::new(RecordId(0), fields), &order));
        assert_eq!(set.columns(), &["zip", "name", "city"]);
    }

    #[test]
    fn test_reversed_pair_deserializes_normalized() {
        let pair: CandidatePair = serde_json::from_str(r#"{"lo":1,"hi":0}"#).unwrap();
        assert_eq!(pair, CandidatePair::new(RecordId(0), RecordId(1)));
        assert_eq!(pair.first(), RecordId(0));

        let training: TrainingSet =
            serde_json::from_str(r#"{"match":[{"lo":5,"hi":2}],"distinct":[]}"#).unwrap();
        assert_eq!(
            training.label_of(&CandidatePair::new(RecordId(2), RecordId(5))),
            Some(Label::Match)
        );

        let round_trip: CandidatePair =
            serde_json::from_str(&serde_json::to_string(&pair).unwrap()).unwrap();
        assert_eq!(round_trip, pair);
    }

    #[test]
    fn test_field_set_signature_is_stable_and_sensitive() {
        let a = FieldSet::new(vec![FieldDefinition::string("name"), FieldDefinition::exact("zip")]);
        let b = FieldSet::new(vec![FieldDefinition::string("name"), FieldDefinition::exact("zip")]);
        let c = FieldSet::new(vec![FieldDefinition::string("name"), FieldDefinition::string("zip")]);
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert_eq!(a.signature().len(), 64);
    }

    #[test]
    fn test_training_set_serializes_with_match_key() {
        let mut training = TrainingSet::new();
        training.push(CandidatePair::new(RecordId(0), RecordId(1)), Label::Match);
        training.push(CandidatePair::new(RecordId(0), RecordId(2)), Label::Distinct);

        let json = serde_json::to_value(&training).unwrap();
        assert!(json.get("match").is_some());
        assert!(json.get("distinct").is_some());
        assert_eq!(
            training.label_of(&CandidatePair::new(RecordId(1), RecordId(0))),
            Some(Label::Match)
        );
        assert_eq!(training.len(), 2);
    }
}
