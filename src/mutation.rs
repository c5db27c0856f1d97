//! Random document mutations.
//!
//! Two interchangeable strategies share one five-way partition of `[0, 1)`:
//! the document-level strategy draws once per targeted document on the
//! client, the pipeline strategy ships the same branch to the server as an
//! aggregation that draws per document.

use crate::core::{DocId, Document};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};

pub const TOUCHED_BY_FIELD: &str = "touchedByProcess";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const FLAG_FIELD: &str = "flag";
pub const SCORE_FIELD: &str = "score";
pub const VISIT_COUNT_FIELD: &str = "visitCount";
pub const NOW_FIELD: &str = "now";
pub const OLD_FIELD: &str = "oldField";
pub const ARCHIVED_FIELD: &str = "archivedField";
const SCRATCH_FIELD: &str = "randVal";

/// One of five equally weighted update shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationShape {
    Touch,
    Flag,
    Score,
    Visit,
    CurrentDate,
}

impl MutationShape {
    pub const ALL: [MutationShape; 5] = [
        MutationShape::Touch,
        MutationShape::Flag,
        MutationShape::Score,
        MutationShape::Visit,
        MutationShape::CurrentDate,
    ];

    pub const WIDTH: f64 = 0.2;

    /// Maps a uniform draw in `[0, 1)` onto its shape.
    pub fn from_draw(r: f64) -> Self {
        if r < 0.2 {
            MutationShape::Touch
        } else if r < 0.4 {
            MutationShape::Flag
        } else if r < 0.6 {
            MutationShape::Score
        } else if r < 0.8 {
            MutationShape::Visit
        } else {
            MutationShape::CurrentDate
        }
    }

    /// Half-open `[low, high)` interval of draws selecting this shape.
    pub fn interval(self) -> (f64, f64) {
        let index = Self::ALL
            .iter()
            .position(|shape| *shape == self)
            .unwrap_or_default() as f64;
        (index * Self::WIDTH, (index + 1.0) * Self::WIDTH)
    }
}

/// A single-document update produced by the document-level strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentUpdate {
    /// `$set` the touching process and a client timestamp.
    Touch { process_id: u32, at: DateTime<Utc> },
    SetFlag(bool),
    /// Uniform in `[0, 1000)`.
    SetScore(f64),
    /// `$inc` the visit counter; an absent counter starts at 0.
    IncrementVisits,
    /// `$currentDate` on the `now` field.
    CurrentDate,
}

impl DocumentUpdate {
    pub fn shape(&self) -> MutationShape {
        match self {
            DocumentUpdate::Touch { .. } => MutationShape::Touch,
            DocumentUpdate::SetFlag(_) => MutationShape::Flag,
            DocumentUpdate::SetScore(_) => MutationShape::Score,
            DocumentUpdate::IncrementVisits => MutationShape::Visit,
            DocumentUpdate::CurrentDate => MutationShape::CurrentDate,
        }
    }

    /// Applies the update in process. `now` stands in for the server clock.
    pub fn apply(&self, doc: &mut Document, now: DateTime<Utc>) {
        match self {
            DocumentUpdate::Touch { process_id, at } => {
                doc.insert(TOUCHED_BY_FIELD.into(), json!(process_id));
                doc.insert(UPDATED_AT_FIELD.into(), json!(at.to_rfc3339()));
            }
            DocumentUpdate::SetFlag(flag) => {
                doc.insert(FLAG_FIELD.into(), json!(flag));
            }
            DocumentUpdate::SetScore(score) => {
                doc.insert(SCORE_FIELD.into(), json!(score));
            }
            DocumentUpdate::IncrementVisits => {
                let visits = doc
                    .get(VISIT_COUNT_FIELD)
                    .and_then(Value::as_i64)
                    .unwrap_or_default();
                doc.insert(VISIT_COUNT_FIELD.into(), json!(visits + 1));
            }
            DocumentUpdate::CurrentDate => {
                doc.insert(NOW_FIELD.into(), json!(now.to_rfc3339()));
            }
        }
    }
}

/// Client-side generator for the document-level strategy.
pub struct RandomMutator {
    rng: StdRng,
    process_id: u32,
}

impl RandomMutator {
    pub fn new(process_id: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, process_id }
    }

    pub fn next_update(&mut self) -> DocumentUpdate {
        let r: f64 = self.rng.r#gen();
        match MutationShape::from_draw(r) {
            MutationShape::Touch => DocumentUpdate::Touch {
                process_id: self.process_id,
                at: Utc::now(),
            },
            MutationShape::Flag => DocumentUpdate::SetFlag(self.rng.gen_bool(0.5)),
            MutationShape::Score => DocumentUpdate::SetScore(self.rng.gen_range(0.0..1000.0)),
            MutationShape::Visit => DocumentUpdate::IncrementVisits,
            MutationShape::CurrentDate => DocumentUpdate::CurrentDate,
        }
    }

    /// One independent update per targeted document.
    pub fn updates_for(&mut self, ids: Vec<DocId>) -> Vec<(DocId, DocumentUpdate)> {
        ids.into_iter()
            .map(|id| {
                let update = self.next_update();
                (id, update)
            })
            .collect()
    }
}

/// Server-side sampled update, merged back into the source collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineMutation {
    /// Fraction of the collection matched by `$sampleRate`.
    pub sample_rate: f64,
    /// Upper bound on matched documents.
    pub limit: usize,
    pub process_id: u32,
}

impl PipelineMutation {
    pub fn new(sample_rate: f64, limit: usize, process_id: u32) -> Self {
        Self {
            sample_rate,
            limit,
            process_id,
        }
    }

    /// Full aggregation, ending in a `$merge` into `collection` on `_id`
    /// (replace when matched, insert when not).
    pub fn stages(&self, collection: &str) -> Vec<Value> {
        let r = format!("${}", SCRATCH_FIELD);
        let between = |low: f64, high: f64| {
            json!({ "$and": [{ "$gte": [r, low] }, { "$lt": [r, high] }] })
        };
        let keep = |field: &str| json!(format!("${}", field));

        vec![
            json!({ "$match": { "$sampleRate": self.sample_rate } }),
            json!({ "$limit": self.limit }),
            json!({ "$addFields": { SCRATCH_FIELD: { "$rand": {} } } }),
            json!({ "$addFields": {
                TOUCHED_BY_FIELD: { "$cond": [{ "$lt": [r, 0.2] }, self.process_id, keep(TOUCHED_BY_FIELD)] },
                UPDATED_AT_FIELD: { "$cond": [{ "$lt": [r, 0.2] }, "$$NOW", keep(UPDATED_AT_FIELD)] },
                FLAG_FIELD: { "$cond": [between(0.2, 0.4), { "$lt": [{ "$rand": {} }, 0.5] }, keep(FLAG_FIELD)] },
                SCORE_FIELD: { "$cond": [
                    between(0.4, 0.6),
                    { "$floor": { "$multiply": [{ "$rand": {} }, 1000] } },
                    keep(SCORE_FIELD),
                ] },
                VISIT_COUNT_FIELD: { "$cond": [
                    between(0.6, 0.8),
                    { "$cond": [
                        { "$eq": [{ "$type": keep(VISIT_COUNT_FIELD) }, "missing"] },
                        1,
                        { "$add": [keep(VISIT_COUNT_FIELD), 1] },
                    ] },
                    keep(VISIT_COUNT_FIELD),
                ] },
                NOW_FIELD: { "$cond": [{ "$gte": [r, 0.8] }, "$$NOW", keep(NOW_FIELD)] },
                ARCHIVED_FIELD: { "$cond": [{ "$gte": [r, 0.8] }, keep(OLD_FIELD), keep(ARCHIVED_FIELD)] },
                OLD_FIELD: { "$cond": [{ "$gte": [r, 0.8] }, "$$REMOVE", keep(OLD_FIELD)] },
                SCRATCH_FIELD: "$$REMOVE",
            } }),
            json!({ "$merge": {
                "into": collection,
                "on": "_id",
                "whenMatched": "replace",
                "whenNotMatched": "insert",
            } }),
        ]
    }

    /// Applies the transformation of [`stages`](Self::stages) to one matched
    /// document in process. The scratch draw is never written to `doc`.
    pub fn apply<R: Rng + ?Sized>(&self, doc: &mut Document, rng: &mut R, now: DateTime<Utc>) {
        let rand_val: f64 = rng.r#gen();
        let stamp = json!(now.to_rfc3339());

        match MutationShape::from_draw(rand_val) {
            MutationShape::Touch => {
                doc.insert(TOUCHED_BY_FIELD.into(), json!(self.process_id));
                doc.insert(UPDATED_AT_FIELD.into(), stamp);
            }
            MutationShape::Flag => {
                doc.insert(FLAG_FIELD.into(), json!(rng.r#gen::<f64>() < 0.5));
            }
            MutationShape::Score => {
                let score = (rng.r#gen::<f64>() * 1000.0).floor();
                doc.insert(SCORE_FIELD.into(), json!(score));
            }
            MutationShape::Visit => DocumentUpdate::IncrementVisits.apply(doc, now),
            MutationShape::CurrentDate => {
                doc.insert(NOW_FIELD.into(), stamp);
                // A missing source field evaluates to missing, which drops the target.
                match doc.remove(OLD_FIELD) {
                    Some(old) => doc.insert(ARCHIVED_FIELD.into(), old),
                    None => doc.remove(ARCHIVED_FIELD),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_shape_partition_has_no_gaps() {
        let mut covered = 0.0;
        for shape in MutationShape::ALL {
            let (low, high) = shape.interval();
            assert!((low - covered).abs() < 1e-12, "gap before {shape:?}");
            assert!((high - low - MutationShape::WIDTH).abs() < 1e-12);
            assert_eq!(MutationShape::from_draw(low), shape);
            assert_eq!(MutationShape::from_draw((low + high) / 2.0), shape);
            covered = high;
        }
        assert!((covered - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_shape_boundaries_are_half_open() {
        assert_eq!(MutationShape::from_draw(0.0), MutationShape::Touch);
        assert_eq!(MutationShape::from_draw(0.199_999), MutationShape::Touch);
        assert_eq!(MutationShape::from_draw(0.2), MutationShape::Flag);
        assert_eq!(MutationShape::from_draw(0.4), MutationShape::Score);
        assert_eq!(MutationShape::from_draw(0.6), MutationShape::Visit);
        assert_eq!(MutationShape::from_draw(0.8), MutationShape::CurrentDate);
        assert_eq!(MutationShape::from_draw(0.999_999), MutationShape::CurrentDate);
    }

    #[test]
    fn test_mutator_covers_every_shape() {
        let mut mutator = RandomMutator::new(42, Some(7));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let update = mutator.next_update();
            if let DocumentUpdate::SetScore(score) = update {
                assert!((0.0..1000.0).contains(&score));
            }
            if let DocumentUpdate::Touch { process_id, .. } = update {
                assert_eq!(process_id, 42);
            }
            seen.insert(update.shape());
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_updates_for_pairs_each_id() {
        let mut mutator = RandomMutator::new(1, Some(1));
        let ids = vec![DocId::Number(0.1), DocId::Number(0.2), DocId::Number(0.3)];
        let updates = mutator.updates_for(ids.clone());
        let targeted: Vec<DocId> = updates.into_iter().map(|(id, _)| id).collect();
        assert_eq!(targeted, ids);
    }

    #[test]
    fn test_increment_starts_from_zero() {
        let mut doc = Document::new();
        DocumentUpdate::IncrementVisits.apply(&mut doc, Utc::now());
        assert_eq!(doc[VISIT_COUNT_FIELD], json!(1));
        DocumentUpdate::IncrementVisits.apply(&mut doc, Utc::now());
        assert_eq!(doc[VISIT_COUNT_FIELD], json!(2));
    }

    #[test]
    fn test_pipeline_stages_shape() {
        let stages = PipelineMutation::new(0.01, 50_000, 99).stages("customID_500");
        assert_eq!(stages.len(), 5);
        assert_eq!(stages[0]["$match"]["$sampleRate"], json!(0.01));
        assert_eq!(stages[1]["$limit"], json!(50_000));
        assert_eq!(stages[2]["$addFields"][SCRATCH_FIELD], json!({ "$rand": {} }));

        let fields = &stages[3]["$addFields"];
        assert_eq!(fields[SCRATCH_FIELD], json!("$$REMOVE"));
        assert_eq!(fields[TOUCHED_BY_FIELD]["$cond"][1], json!(99));
        assert_eq!(fields[OLD_FIELD]["$cond"][1], json!("$$REMOVE"));
        assert_eq!(fields[ARCHIVED_FIELD]["$cond"][1], json!("$oldField"));

        let merge = &stages[4]["$merge"];
        assert_eq!(merge["into"], json!("customID_500"));
        assert_eq!(merge["whenMatched"], json!("replace"));
        assert_eq!(merge["whenNotMatched"], json!("insert"));
    }

    #[test]
    fn test_pipeline_apply_archives_on_high_draw() {
        // StepRng yields u64::MAX, which maps to a draw just below 1.0.
        let mut rng = StepRng::new(u64::MAX, 0);
        let mutation = PipelineMutation::new(1.0, 10, 5);
        let mut doc = Document::new();
        doc.insert(OLD_FIELD.into(), json!("legacy"));
        doc.insert(ARCHIVED_FIELD.into(), json!("stale"));

        mutation.apply(&mut doc, &mut rng, Utc::now());

        assert_eq!(doc[ARCHIVED_FIELD], json!("legacy"));
        assert!(!doc.contains_key(OLD_FIELD));
        assert!(doc.contains_key(NOW_FIELD));
        assert!(!doc.contains_key(SCRATCH_FIELD));
    }

    #[test]
    fn test_pipeline_apply_touch_on_low_draw() {
        let mut rng = StepRng::new(0, 0);
        let mutation = PipelineMutation::new(1.0, 10, 5);
        let mut doc = Document::new();
        doc.insert(OLD_FIELD.into(), json!("legacy"));

        mutation.apply(&mut doc, &mut rng, Utc::now());

        assert_eq!(doc[TOUCHED_BY_FIELD], json!(5));
        assert!(doc.contains_key(UPDATED_AT_FIELD));
        assert_eq!(doc[OLD_FIELD], json!("legacy"));
        assert!(!doc.contains_key(ARCHIVED_FIELD));
    }
}
