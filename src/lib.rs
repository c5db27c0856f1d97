// ============================================================================
// shardchurn Library
// ============================================================================

pub mod capabilities;
pub mod client;
pub mod config;
pub mod core;
pub mod mutation;
pub mod presplit;
pub mod setup;
pub mod signal;
pub mod topology;
pub mod workload;

// Re-export main types for convenience
pub use capabilities::{Capabilities, MutationStrategy, ServerVersion};
pub use client::{ClusterClient, FailurePoint, MemoryCluster};
#[cfg(feature = "mongodb")]
pub use client::MongoCluster;
pub use config::ChurnConfig;
pub use core::{
    BatchOutcome, ChurnError, DocId, Document, MoveChunkOptions, Namespace, Result, ShardKey,
    ShardKeyKind, WriteConcern,
};
pub use mutation::{DocumentUpdate, MutationShape, PipelineMutation, RandomMutator};
pub use presplit::{KeyRange, PreSplitReport, pre_split};
pub use setup::{LoadProgress, PreparedCollection, initial_load, prepare_collections};
pub use signal::{StopSignal, install_stop_handlers};
pub use topology::{ShardTopology, is_sharded, shard_identifiers};
pub use workload::{CollectionDescriptor, CycleReport, IdMode, WorkloadEngine, WriteStats};
