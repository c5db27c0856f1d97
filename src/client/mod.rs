//! Store command surface.
//!
//! Everything the tool needs from a cluster goes through [`ClusterClient`]:
//! topology introspection, chunk management, and the batch writes of the
//! workload engine. Batch writes report partial failure through
//! [`BatchOutcome`]; an `Err` means the whole call failed.

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
mod placement;

use crate::core::{
    BatchOutcome, DocId, Document, MoveChunkOptions, Namespace, Result, ShardKey, WriteConcern,
};
use crate::mutation::{DocumentUpdate, PipelineMutation};
use async_trait::async_trait;

pub use memory::{ChunkView, FailurePoint, MemoryCluster};
#[cfg(feature = "mongodb")]
pub use mongo::MongoCluster;
pub use placement::stable_position;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Shard identifiers from the sharding status. Fails on deployments that
    /// are not sharded.
    async fn list_shards(&self) -> Result<Vec<String>>;

    async fn server_version(&self) -> Result<String>;

    /// Registered shard key, or `None` if the collection is not sharded.
    async fn shard_key(&self, ns: &Namespace) -> Result<Option<ShardKey>>;

    async fn split_chunk(&self, ns: &Namespace, field: &str, middle: f64) -> Result<()>;

    /// Moves the chunk containing `{field: find}` to `to_shard`.
    async fn move_chunk(
        &self,
        ns: &Namespace,
        field: &str,
        find: f64,
        to_shard: &str,
        options: &MoveChunkOptions,
    ) -> Result<()>;

    async fn stop_balancer(&self) -> Result<()>;

    async fn list_collections(&self, db: &str) -> Result<Vec<String>>;

    /// Fails with `NamespaceExists` if the collection is already there.
    async fn create_collection(&self, ns: &Namespace) -> Result<()>;

    async fn create_index(&self, ns: &Namespace, key: &ShardKey) -> Result<()>;

    async fn enable_sharding(&self, db: &str) -> Result<()>;

    async fn shard_collection(&self, ns: &Namespace, key: &ShardKey) -> Result<()>;

    /// Owning shard of every chunk of the collection.
    async fn chunk_shards(&self, ns: &Namespace) -> Result<Vec<String>>;

    /// Unordered insert; documents without `_id` get a server-assigned one.
    async fn insert_many(
        &self,
        ns: &Namespace,
        docs: Vec<Document>,
        concern: WriteConcern,
    ) -> Result<BatchOutcome>;

    /// One update statement per id, sent as a single batch.
    async fn update_each(
        &self,
        ns: &Namespace,
        updates: Vec<(DocId, DocumentUpdate)>,
        concern: WriteConcern,
    ) -> Result<BatchOutcome>;

    /// Runs the sampled pipeline and merges its output into the collection.
    async fn merge_pipeline(&self, ns: &Namespace, mutation: &PipelineMutation) -> Result<()>;

    /// Up to `size` random document ids.
    async fn sample_ids(&self, ns: &Namespace, size: usize) -> Result<Vec<DocId>>;

    /// Deletes each document independently with probability `rate`.
    async fn delete_sampled(&self, ns: &Namespace, rate: f64) -> Result<u64>;

    async fn delete_ids(&self, ns: &Namespace, ids: &[DocId]) -> Result<u64>;

    async fn estimated_count(&self, ns: &Namespace) -> Result<u64>;
}
