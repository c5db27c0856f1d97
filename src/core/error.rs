use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChurnError {
    #[error("Invalid namespace: '{0}'")]
    InvalidNamespace(String),

    #[error("Cluster is not sharded: {0}")]
    NotSharded(String),

    #[error("Cluster reports zero shards")]
    NoShards,

    #[error("Collection '{0}' is not sharded (no entry in config.collections)")]
    CollectionNotSharded(String),

    #[error("Shard key must be the single field '{expected}', found {actual}")]
    ShardKeyMismatch { expected: String, actual: String },

    #[error("Shard key on '{0}' is hashed; hashed keys are auto-split, even with the balancer off")]
    HashedShardKey(String),

    #[error("Shard key has unknown value: {0}")]
    UnknownShardKey(String),

    #[error("Invalid key range: [{min}, {max}]")]
    InvalidKeyRange { min: f64, max: f64 },

    #[error("Malformed server version: '{0}'")]
    InvalidVersion(String),

    #[error("Namespace '{0}' already exists")]
    NamespaceExists(String),

    #[error("Shard '{0}' not found")]
    UnknownShard(String),

    #[error("Chunks of '{namespace}' cover {covered} of {shards} shards")]
    ChunksNotDistributed {
        namespace: String,
        covered: usize,
        shards: usize,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, ChurnError>;

impl ChurnError {
    /// Fatal errors abort a setup step; everything else is worth a retry.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ChurnError::Backend(_) | ChurnError::NamespaceExists(_) | ChurnError::UnknownShard(_)
        )
    }
}
