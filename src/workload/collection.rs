use crate::core::{Document, Namespace};
use crate::mutation::OLD_FIELD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Default document size classes in bytes.
pub const DEFAULT_DOC_SIZES: [usize; 3] = [500, 1000, 2000];

// Excluded for clarity: I, l, 1, O, o, 0
const HUMAN_CHARSET: &[u8] = b"abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Who assigns the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdMode {
    /// Random fraction in `[0, 1)` chosen by this process.
    ClientAssigned,
    /// Left unset; the server assigns a sequential-like object id.
    Sequential,
}

impl IdMode {
    pub const ALL: [IdMode; 2] = [IdMode::ClientAssigned, IdMode::Sequential];

    pub fn prefix(self) -> &'static str {
        match self {
            IdMode::ClientAssigned => "customID",
            IdMode::Sequential => "sequentialID",
        }
    }
}

impl fmt::Display for IdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One (size class x id mode) combination; maps to exactly one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub document_size_bytes: usize,
    pub id_mode: IdMode,
}

impl CollectionDescriptor {
    pub fn new(document_size_bytes: usize, id_mode: IdMode) -> Self {
        Self {
            document_size_bytes,
            id_mode,
        }
    }

    pub fn uses_client_assigned_key(&self) -> bool {
        self.id_mode == IdMode::ClientAssigned
    }

    pub fn name(&self) -> String {
        format!("{}_{}", self.id_mode.prefix(), self.document_size_bytes)
    }

    pub fn namespace(&self, db: &str) -> Namespace {
        Namespace::new(db, self.name())
    }

    fn assign_id<R: Rng + ?Sized>(&self, rng: &mut R, doc: &mut Document) {
        if self.uses_client_assigned_key() {
            doc.insert("_id".into(), json!(rng.r#gen::<f64>()));
        }
    }

    /// Document written by the steady-state insert phase.
    pub fn churn_document<R: Rng + ?Sized>(&self, rng: &mut R, padding: &str) -> Document {
        let mut doc = Document::new();
        self.assign_id(rng, &mut doc);
        doc.insert("rand".into(), json!(rng.r#gen::<f64>()));
        doc.insert("str".into(), json!(padding));
        doc.insert("fromUpdates".into(), json!(true));
        doc.insert(OLD_FIELD.into(), json!(random_string(rng, 16)));
        doc
    }

    /// Document written by the initial bulk load.
    pub fn seed_document<R: Rng + ?Sized>(&self, rng: &mut R, padding: &str) -> Document {
        let mut doc = Document::new();
        self.assign_id(rng, &mut doc);
        doc.insert("str".into(), json!(padding));
        doc.insert("a".into(), json!(1));
        doc
    }
}

/// Sizes outer, id modes inner; the fixed round-robin order of the engine.
pub fn descriptors(sizes: &[usize], modes: &[IdMode]) -> Vec<CollectionDescriptor> {
    sizes
        .iter()
        .flat_map(|size| {
            modes
                .iter()
                .map(move |mode| CollectionDescriptor::new(*size, *mode))
        })
        .collect()
}

/// Random string over a charset without look-alike characters.
pub fn random_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| HUMAN_CHARSET[rng.gen_range(0..HUMAN_CHARSET.len())] as char)
        .collect()
}

/// Target document count of a collection: the collection's byte share
/// divided by its document size.
pub fn target_document_count(collection_bytes: u64, descriptor: &CollectionDescriptor) -> u64 {
    collection_bytes / descriptor.document_size_bytes.max(1) as u64
}

/// Document count recorded the first time a collection is visited. It is
/// the level the delete phase restores the collection to, and is never
/// recomputed afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Baseline(Option<u64>);

impl Baseline {
    pub fn get(&self) -> Option<u64> {
        self.0
    }

    /// Records `observed` unless a baseline already exists; returns the
    /// effective baseline.
    pub fn establish(&mut self, observed: u64) -> u64 {
        *self.0.get_or_insert(observed)
    }

    /// Documents above the baseline. Negative when below it.
    pub fn excess(&self, current: u64) -> Option<i64> {
        self.0.map(|baseline| current as i64 - baseline as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_names_are_deterministic() {
        let custom = CollectionDescriptor::new(500, IdMode::ClientAssigned);
        let sequential = CollectionDescriptor::new(2000, IdMode::Sequential);
        assert_eq!(custom.name(), "customID_500");
        assert_eq!(sequential.name(), "sequentialID_2000");
        assert_eq!(custom.namespace("test").to_string(), "test.customID_500");
    }

    #[test]
    fn test_descriptor_order() {
        let all = descriptors(&DEFAULT_DOC_SIZES, &IdMode::ALL);
        let names: Vec<String> = all.iter().map(CollectionDescriptor::name).collect();
        assert_eq!(
            names,
            vec![
                "customID_500",
                "sequentialID_500",
                "customID_1000",
                "sequentialID_1000",
                "customID_2000",
                "sequentialID_2000",
            ]
        );
    }

    #[test]
    fn test_churn_document_shape() {
        let mut rng = StdRng::seed_from_u64(9);
        let padding = "y".repeat(500);

        let custom = CollectionDescriptor::new(500, IdMode::ClientAssigned);
        let doc = custom.churn_document(&mut rng, &padding);
        let id = doc["_id"].as_f64().unwrap();
        assert!((0.0..1.0).contains(&id));
        assert_eq!(doc["str"].as_str().unwrap().len(), 500);
        assert_eq!(doc["fromUpdates"], json!(true));
        assert_eq!(doc[OLD_FIELD].as_str().unwrap().len(), 16);

        let sequential = CollectionDescriptor::new(500, IdMode::Sequential);
        let doc = sequential.seed_document(&mut rng, &padding);
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc["a"], json!(1));
    }

    #[test]
    fn test_random_string_avoids_lookalikes() {
        let mut rng = StdRng::seed_from_u64(1);
        let s = random_string(&mut rng, 2_000);
        assert_eq!(s.len(), 2_000);
        assert!(!s.contains(['I', 'l', '1', 'O', 'o', '0']));
    }

    #[test]
    fn test_baseline_is_set_once() {
        let mut baseline = Baseline::default();
        assert_eq!(baseline.get(), None);
        assert_eq!(baseline.excess(10), None);
        assert_eq!(baseline.establish(100), 100);
        assert_eq!(baseline.establish(250), 100);
        assert_eq!(baseline.get(), Some(100));
        assert_eq!(baseline.excess(150), Some(50));
        assert_eq!(baseline.excess(90), Some(-10));
    }

    #[test]
    fn test_target_document_count() {
        let desc = CollectionDescriptor::new(1000, IdMode::Sequential);
        assert_eq!(target_document_count(1_000_000, &desc), 1_000);
    }
}
