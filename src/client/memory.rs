use super::{ClusterClient, stable_position};
use crate::core::{
    BatchOutcome, ChurnError, DocId, Document, MoveChunkOptions, Namespace, Result, ShardKey,
    ShardKeyKind, WriteConcern,
};
use crate::mutation::{DocumentUpdate, PipelineMutation};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

/// Store commands that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    ListShards,
    Split,
    MoveChunk,
    Insert,
    Update,
    Pipeline,
    Sample,
    Delete,
    Count,
}

/// A chunk of a sharded collection, `[min, max)` over the key space. The
/// outermost chunks extend to the infinities.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkView {
    pub min: f64,
    pub max: f64,
    pub shard: String,
}

impl ChunkView {
    fn contains(&self, key: f64) -> bool {
        self.min <= key && (key < self.max || self.max == f64::INFINITY)
    }
}

#[derive(Default)]
struct MemoryCollection {
    docs: BTreeMap<DocId, Document>,
    shard_key: Option<ShardKey>,
    chunks: Vec<ChunkView>,
    indexes: Vec<ShardKey>,
}

impl MemoryCollection {
    fn key_position(&self, id: &DocId) -> f64 {
        match &self.shard_key {
            Some(key) if key.is_hashed() => stable_position(id),
            _ => id.as_f64().unwrap_or(f64::INFINITY),
        }
    }

    fn chunk_index(&self, key: f64) -> Option<usize> {
        self.chunks.iter().position(|chunk| chunk.contains(key))
    }
}

struct ClusterState {
    shards: Vec<String>,
    sharded: bool,
    balancer_enabled: bool,
    sharded_dbs: BTreeSet<String>,
    collections: BTreeMap<Namespace, MemoryCollection>,
    object_id_counter: u64,
    migrations: u64,
    rng: StdRng,
    failures: HashMap<FailurePoint, usize>,
    last_move_options: Option<MoveChunkOptions>,
    last_insert_concern: Option<WriteConcern>,
    last_update_concern: Option<WriteConcern>,
}

impl ClusterState {
    fn check(&mut self, point: FailurePoint) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(&point) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChurnError::Backend(format!(
                    "injected {:?} failure",
                    point
                )));
            }
        }
        Ok(())
    }

    fn require_sharded(&self) -> Result<()> {
        if self.sharded {
            Ok(())
        } else {
            Err(ChurnError::NotSharded(
                "no such command: 'listShards'".to_string(),
            ))
        }
    }

    fn sharded_collection(&mut self, ns: &Namespace) -> Result<&mut MemoryCollection> {
        self.collections
            .get_mut(ns)
            .filter(|coll| coll.shard_key.is_some())
            .ok_or_else(|| ChurnError::CollectionNotSharded(ns.to_string()))
    }

    fn next_object_id(&mut self) -> DocId {
        self.object_id_counter += 1;
        let seconds = Utc::now().timestamp() as u32;
        DocId::Object(format!("{:08x}{:016x}", seconds, self.object_id_counter))
    }
}

/// In-process simulation of a sharded document store.
///
/// Keeps shards, chunk maps and documents in memory so the pre-splitter and
/// the workload engine can run without a live cluster. Individual commands
/// can be made to fail with [`fail_next`](MemoryCluster::fail_next).
pub struct MemoryCluster {
    version: String,
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    /// A sharded cluster with shards named `shard-0 .. shard-{n-1}`.
    pub fn sharded(shard_count: usize) -> Self {
        Self::build(
            (0..shard_count).map(|i| format!("shard-{}", i)).collect(),
            true,
        )
    }

    /// A plain replica set: every sharding command fails.
    pub fn replica_set() -> Self {
        Self::build(Vec::new(), false)
    }

    fn build(shards: Vec<String>, sharded: bool) -> Self {
        Self {
            version: "7.0.0".to_string(),
            state: Mutex::new(ClusterState {
                shards,
                sharded,
                balancer_enabled: sharded,
                sharded_dbs: BTreeSet::new(),
                collections: BTreeMap::new(),
                object_id_counter: 0,
                migrations: 0,
                rng: StdRng::from_entropy(),
                failures: HashMap::new(),
                last_move_options: None,
                last_insert_concern: None,
                last_update_concern: None,
            }),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.state.get_mut().rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Makes the next `times` calls hitting `point` fail.
    pub async fn fail_next(&self, point: FailurePoint, times: usize) {
        let mut state = self.state.lock().await;
        *state.failures.entry(point).or_default() += times;
    }

    pub async fn balancer_enabled(&self) -> bool {
        self.state.lock().await.balancer_enabled
    }

    /// Number of chunk moves that changed a chunk's owner.
    pub async fn migrations(&self) -> u64 {
        self.state.lock().await.migrations
    }

    /// Options of the most recent chunk move that reached the cluster.
    pub async fn last_move_options(&self) -> Option<MoveChunkOptions> {
        self.state.lock().await.last_move_options.clone()
    }

    pub async fn last_insert_concern(&self) -> Option<WriteConcern> {
        self.state.lock().await.last_insert_concern
    }

    pub async fn last_update_concern(&self) -> Option<WriteConcern> {
        self.state.lock().await.last_update_concern
    }

    pub async fn chunks(&self, ns: &Namespace) -> Vec<ChunkView> {
        let state = self.state.lock().await;
        state
            .collections
            .get(ns)
            .map(|coll| coll.chunks.clone())
            .unwrap_or_default()
    }

    /// Document count per owning shard, following the chunk map.
    pub async fn documents_per_shard(&self, ns: &Namespace) -> BTreeMap<String, u64> {
        let state = self.state.lock().await;
        let mut counts = BTreeMap::new();
        if let Some(coll) = state.collections.get(ns) {
            for id in coll.docs.keys() {
                let key = coll.key_position(id);
                if let Some(index) = coll.chunk_index(key) {
                    *counts.entry(coll.chunks[index].shard.clone()).or_default() += 1;
                }
            }
        }
        counts
    }

    pub async fn document(&self, ns: &Namespace, id: &DocId) -> Option<Document> {
        let state = self.state.lock().await;
        state.collections.get(ns)?.docs.get(id).cloned()
    }

    pub async fn documents(&self, ns: &Namespace) -> Vec<Document> {
        let state = self.state.lock().await;
        state
            .collections
            .get(ns)
            .map(|coll| coll.docs.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn list_shards(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::ListShards)?;
        state.require_sharded()?;
        Ok(state.shards.clone())
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn shard_key(&self, ns: &Namespace) -> Result<Option<ShardKey>> {
        let state = self.state.lock().await;
        state.require_sharded()?;
        Ok(state
            .collections
            .get(ns)
            .and_then(|coll| coll.shard_key.clone()))
    }

    async fn split_chunk(&self, ns: &Namespace, field: &str, middle: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Split)?;
        let coll = state.sharded_collection(ns)?;

        match coll.shard_key.as_ref().and_then(|key| key.single_field()) {
            Some((key_field, ShardKeyKind::Ascending)) if key_field == field => {}
            _ => {
                return Err(ChurnError::Backend(format!(
                    "split middle {{{}: {}}} does not match the shard key of {}",
                    field, middle, ns
                )));
            }
        }

        let index = coll
            .chunk_index(middle)
            .ok_or_else(|| ChurnError::Backend(format!("no chunk contains {}", middle)))?;
        let chunk = &mut coll.chunks[index];
        if chunk.min == middle {
            return Ok(());
        }
        let upper = ChunkView {
            min: middle,
            max: chunk.max,
            shard: chunk.shard.clone(),
        };
        chunk.max = middle;
        coll.chunks.insert(index + 1, upper);
        Ok(())
    }

    async fn move_chunk(
        &self,
        ns: &Namespace,
        _field: &str,
        find: f64,
        to_shard: &str,
        options: &MoveChunkOptions,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::MoveChunk)?;
        state.last_move_options = Some(options.clone());
        if !state.shards.iter().any(|shard| shard == to_shard) {
            return Err(ChurnError::UnknownShard(to_shard.to_string()));
        }
        let coll = state.sharded_collection(ns)?;
        let index = coll
            .chunk_index(find)
            .ok_or_else(|| ChurnError::Backend(format!("no chunk contains {}", find)))?;
        let chunk = &mut coll.chunks[index];
        if chunk.shard != to_shard {
            chunk.shard = to_shard.to_string();
            state.migrations += 1;
        }
        Ok(())
    }

    async fn stop_balancer(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_sharded()?;
        state.balancer_enabled = false;
        Ok(())
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .keys()
            .filter(|ns| ns.db == db)
            .map(|ns| ns.collection.clone())
            .collect())
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.collections.contains_key(ns) {
            return Err(ChurnError::NamespaceExists(ns.to_string()));
        }
        state.collections.insert(ns.clone(), MemoryCollection::default());
        Ok(())
    }

    async fn create_index(&self, ns: &Namespace, key: &ShardKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let coll = state.collections.entry(ns.clone()).or_default();
        if !coll.indexes.contains(key) {
            coll.indexes.push(key.clone());
        }
        Ok(())
    }

    async fn enable_sharding(&self, db: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_sharded()?;
        state.sharded_dbs.insert(db.to_string());
        Ok(())
    }

    async fn shard_collection(&self, ns: &Namespace, key: &ShardKey) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_sharded()?;
        if !state.sharded_dbs.contains(&ns.db) {
            return Err(ChurnError::Backend(format!(
                "sharding not enabled for db {}",
                ns.db
            )));
        }
        let shards = state.shards.clone();
        let Some(primary) = shards.first().cloned() else {
            return Err(ChurnError::NoShards);
        };

        let coll = state.collections.entry(ns.clone()).or_default();
        if let Some(existing) = &coll.shard_key {
            if existing == key {
                return Ok(());
            }
            return Err(ChurnError::Backend(format!(
                "{} is already sharded with key {}",
                ns, existing
            )));
        }

        coll.chunks = if key.is_hashed() {
            let n = shards.len();
            shards
                .iter()
                .enumerate()
                .map(|(i, shard)| ChunkView {
                    min: if i == 0 {
                        f64::NEG_INFINITY
                    } else {
                        i as f64 / n as f64
                    },
                    max: if i + 1 == n {
                        f64::INFINITY
                    } else {
                        (i + 1) as f64 / n as f64
                    },
                    shard: shard.clone(),
                })
                .collect()
        } else {
            vec![ChunkView {
                min: f64::NEG_INFINITY,
                max: f64::INFINITY,
                shard: primary,
            }]
        };
        coll.shard_key = Some(key.clone());
        Ok(())
    }

    async fn chunk_shards(&self, ns: &Namespace) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .get(ns)
            .map(|coll| coll.chunks.iter().map(|c| c.shard.clone()).collect())
            .unwrap_or_default())
    }

    async fn insert_many(
        &self,
        ns: &Namespace,
        docs: Vec<Document>,
        concern: WriteConcern,
    ) -> Result<BatchOutcome> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Insert)?;
        state.last_insert_concern = Some(concern);

        let mut outcome = BatchOutcome::default();
        for mut doc in docs {
            let id = match doc.get("_id") {
                None => {
                    let id = state.next_object_id();
                    doc.insert("_id".to_string(), id.to_value());
                    id
                }
                Some(value) => match DocId::from_value(value) {
                    Some(id) => id,
                    None => {
                        outcome.record_rejection(format!("unsupported _id {}", value));
                        continue;
                    }
                },
            };

            let coll = state.collections.entry(ns.clone()).or_default();
            if coll.docs.contains_key(&id) {
                outcome.record_rejection(format!("E11000 duplicate key: _id {}", id));
                continue;
            }
            coll.docs.insert(id, doc);
            outcome.accepted += 1;
        }

        if concern == WriteConcern::Unacknowledged {
            return Ok(BatchOutcome::default());
        }
        Ok(outcome)
    }

    async fn update_each(
        &self,
        ns: &Namespace,
        updates: Vec<(DocId, DocumentUpdate)>,
        concern: WriteConcern,
    ) -> Result<BatchOutcome> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Update)?;
        state.last_update_concern = Some(concern);
        let now = Utc::now();
        let mut outcome = BatchOutcome::default();
        if let Some(coll) = state.collections.get_mut(ns) {
            for (id, update) in updates {
                if let Some(doc) = coll.docs.get_mut(&id) {
                    update.apply(doc, now);
                    outcome.accepted += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn merge_pipeline(&self, ns: &Namespace, mutation: &PipelineMutation) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Pipeline)?;
        let now = Utc::now();
        let ClusterState {
            collections, rng, ..
        } = &mut *state;
        let Some(coll) = collections.get_mut(ns) else {
            return Ok(());
        };

        let matched: Vec<DocId> = coll
            .docs
            .keys()
            .filter(|_| rng.gen_bool(mutation.sample_rate.clamp(0.0, 1.0)))
            .take(mutation.limit)
            .cloned()
            .collect();
        for id in matched {
            if let Some(doc) = coll.docs.get_mut(&id) {
                mutation.apply(doc, &mut *rng, now);
            }
        }
        Ok(())
    }

    async fn sample_ids(&self, ns: &Namespace, size: usize) -> Result<Vec<DocId>> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Sample)?;
        let ClusterState {
            collections, rng, ..
        } = &mut *state;
        Ok(collections
            .get(ns)
            .map(|coll| coll.docs.keys().cloned().choose_multiple(rng, size))
            .unwrap_or_default())
    }

    async fn delete_sampled(&self, ns: &Namespace, rate: f64) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Delete)?;
        let ClusterState {
            collections, rng, ..
        } = &mut *state;
        let Some(coll) = collections.get_mut(ns) else {
            return Ok(0);
        };
        let before = coll.docs.len();
        let rate = rate.clamp(0.0, 1.0);
        coll.docs.retain(|_, _| !rng.gen_bool(rate));
        Ok((before - coll.docs.len()) as u64)
    }

    async fn delete_ids(&self, ns: &Namespace, ids: &[DocId]) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Delete)?;
        let Some(coll) = state.collections.get_mut(ns) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| coll.docs.remove(*id).is_some())
            .count() as u64)
    }

    async fn estimated_count(&self, ns: &Namespace) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check(FailurePoint::Count)?;
        Ok(state
            .collections
            .get(ns)
            .map(|coll| coll.docs.len() as u64)
            .unwrap_or(0))
    }
}
