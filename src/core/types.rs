use super::{ChurnError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A document as exchanged with the store.
pub type Document = serde_json::Map<String, Value>;

/// Fully-qualified collection name, `db.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// Parse `db.collection`. The collection part may itself contain dots.
    pub fn parse(ns: &str) -> Result<Self> {
        match ns.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(ChurnError::InvalidNamespace(ns.to_string())),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// Primary key of a document.
///
/// Client-assigned keys are random fractions; server-assigned keys are
/// 24-character hex object ids.
#[derive(Debug, Clone)]
pub enum DocId {
    Number(f64),
    Object(String),
}

impl DocId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(DocId::Number),
            Value::String(s) if s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit()) => {
                Some(DocId::Object(s.to_ascii_lowercase()))
            }
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocId::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DocId::Object(hex) => Value::String(hex.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DocId::Number(n) => Some(*n),
            DocId::Object(_) => None,
        }
    }
}

impl Ord for DocId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DocId::Number(a), DocId::Number(b)) => a.total_cmp(b),
            (DocId::Number(_), DocId::Object(_)) => Ordering::Less,
            (DocId::Object(_), DocId::Number(_)) => Ordering::Greater,
            (DocId::Object(a), DocId::Object(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for DocId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DocId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DocId {}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocId::Number(n) => write!(f, "{}", n),
            DocId::Object(hex) => write!(f, "ObjectId({})", hex),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardKeyKind {
    Ascending,
    Hashed,
    /// Anything else the server reports (descending, compound specs, ...).
    Other(String),
}

/// Shard key pattern as registered in the cluster catalog, in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardKey {
    pub fields: Vec<(String, ShardKeyKind)>,
}

impl ShardKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            fields: vec![(field.into(), ShardKeyKind::Ascending)],
        }
    }

    pub fn hashed(field: impl Into<String>) -> Self {
        Self {
            fields: vec![(field.into(), ShardKeyKind::Hashed)],
        }
    }

    pub fn single_field(&self) -> Option<(&str, &ShardKeyKind)> {
        match self.fields.as_slice() {
            [(field, kind)] => Some((field.as_str(), kind)),
            _ => None,
        }
    }

    pub fn is_hashed(&self) -> bool {
        self.fields
            .iter()
            .any(|(_, kind)| matches!(kind, ShardKeyKind::Hashed))
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (field, kind)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match kind {
                ShardKeyKind::Ascending => write!(f, "{}: 1", field)?,
                ShardKeyKind::Hashed => write!(f, "{}: \"hashed\"", field)?,
                ShardKeyKind::Other(raw) => write!(f, "{}: {}", field, raw)?,
            }
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteConcern {
    #[default]
    Acknowledged,
    /// `w: 0`
    Unacknowledged,
    /// `w: "majority", j: true`
    MajorityJournaled,
}

/// Result of a batch write: how many statements the store accepted, how many
/// it rejected, and the first rejection cause if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub accepted: u64,
    pub rejected: u64,
    pub cause: Option<String>,
}

impl BatchOutcome {
    pub fn accepted(count: u64) -> Self {
        Self {
            accepted: count,
            ..Default::default()
        }
    }

    pub fn record_rejection(&mut self, cause: impl Into<String>) {
        self.rejected += 1;
        if self.cause.is_none() {
            self.cause = Some(cause.into());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.rejected == 0
    }
}

/// Options for a chunk migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveChunkOptions {
    pub write_concern: WriteConcern,
    pub secondary_throttle: bool,
    pub wait_for_delete: bool,
}

impl Default for MoveChunkOptions {
    fn default() -> Self {
        Self {
            write_concern: WriteConcern::MajorityJournaled,
            secondary_throttle: true,
            wait_for_delete: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespace_parse() {
        let ns = Namespace::parse("test.customID_500").unwrap();
        assert_eq!(ns.db, "test");
        assert_eq!(ns.collection, "customID_500");
        assert_eq!(ns.to_string(), "test.customID_500");

        let dotted = Namespace::parse("test.a.b").unwrap();
        assert_eq!(dotted.collection, "a.b");

        assert!(Namespace::parse("test").is_err());
        assert!(Namespace::parse(".coll").is_err());
        assert!(Namespace::parse("test.").is_err());
    }

    #[test]
    fn test_doc_id_from_value() {
        assert_eq!(DocId::from_value(&json!(0.25)), Some(DocId::Number(0.25)));
        assert_eq!(
            DocId::from_value(&json!("65A000000000000000000001")),
            Some(DocId::Object("65a000000000000000000001".into()))
        );
        assert_eq!(DocId::from_value(&json!("short")), None);
        assert_eq!(DocId::from_value(&json!(true)), None);
    }

    #[test]
    fn test_doc_id_ordering() {
        let mut ids = vec![
            DocId::Object("000000000000000000000002".into()),
            DocId::Number(0.9),
            DocId::Object("000000000000000000000001".into()),
            DocId::Number(0.1),
        ];
        ids.sort();
        assert_eq!(ids[0], DocId::Number(0.1));
        assert_eq!(ids[1], DocId::Number(0.9));
        assert_eq!(ids[2], DocId::Object("000000000000000000000001".into()));
    }

    #[test]
    fn test_shard_key_display_and_single_field() {
        let key = ShardKey::ascending("_id");
        assert_eq!(key.to_string(), "{_id: 1}");
        assert_eq!(key.single_field(), Some(("_id", &ShardKeyKind::Ascending)));

        let compound = ShardKey {
            fields: vec![
                ("a".into(), ShardKeyKind::Ascending),
                ("b".into(), ShardKeyKind::Hashed),
            ],
        };
        assert!(compound.single_field().is_none());
        assert!(compound.is_hashed());
        assert_eq!(compound.to_string(), "{a: 1, b: \"hashed\"}");
    }

    #[test]
    fn test_batch_outcome_keeps_first_cause() {
        let mut outcome = BatchOutcome::accepted(3);
        outcome.record_rejection("duplicate key");
        outcome.record_rejection("document too large");
        assert_eq!(outcome.rejected, 2);
        assert_eq!(outcome.cause.as_deref(), Some("duplicate key"));
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_chunk_moves_default_to_durable_options() {
        let options = MoveChunkOptions::default();
        assert_eq!(options.write_concern, WriteConcern::MajorityJournaled);
        assert!(options.secondary_throttle);
        assert!(options.wait_for_delete);
    }
}
