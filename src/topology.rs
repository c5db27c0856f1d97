//! Shard membership and sharding status.

use crate::client::ClusterClient;
use crate::core::{ChurnError, Result};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Read-only snapshot of the cluster's shard membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTopology {
    pub shards: BTreeSet<String>,
    pub sharded: bool,
}

impl ShardTopology {
    /// Takes a fresh snapshot. An unsharded deployment yields an empty,
    /// non-sharded topology rather than an error.
    pub async fn observe(client: &dyn ClusterClient) -> Result<Self> {
        if !is_sharded(client).await {
            return Ok(Self {
                shards: BTreeSet::new(),
                sharded: false,
            });
        }
        Ok(Self {
            shards: shard_identifiers(client).await?,
            sharded: true,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Whether sharding commands work against this deployment. Any failure of the
/// status query means "not sharded".
pub async fn is_sharded(client: &dyn ClusterClient) -> bool {
    match client.list_shards().await {
        Ok(_) => {
            info!("Cluster is sharded.");
            true
        }
        Err(err) => {
            warn!(
                "Sharding commands failed; treating deployment as unsharded: {}",
                err
            );
            false
        }
    }
}

/// Shard ids in sorted order. Zero shards is fatal: every size calculation
/// downstream divides by the shard count.
pub async fn shard_identifiers(client: &dyn ClusterClient) -> Result<BTreeSet<String>> {
    let shards: BTreeSet<String> = client.list_shards().await?.into_iter().collect();
    if shards.is_empty() {
        return Err(ChurnError::NoShards);
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FailurePoint, MemoryCluster};

    #[test]
    fn test_observe_sharded_cluster() {
        let cluster = MemoryCluster::sharded(3);
        let topology = tokio_test::block_on(ShardTopology::observe(&cluster)).unwrap();
        assert!(topology.sharded);
        assert_eq!(topology.shard_count(), 3);
        assert!(topology.shards.contains("shard-2"));
    }

    #[tokio::test]
    async fn test_replica_set_is_not_sharded() {
        let cluster = MemoryCluster::replica_set();
        assert!(!is_sharded(&cluster).await);
        let topology = ShardTopology::observe(&cluster).await.unwrap();
        assert!(!topology.sharded);
        assert_eq!(topology.shard_count(), 0);
    }

    #[tokio::test]
    async fn test_status_failure_is_not_escalated() {
        let cluster = MemoryCluster::sharded(2);
        cluster.fail_next(FailurePoint::ListShards, 1).await;
        assert!(!is_sharded(&cluster).await);
        assert!(is_sharded(&cluster).await);
    }

    #[tokio::test]
    async fn test_zero_shards_is_fatal() {
        let cluster = MemoryCluster::sharded(0);
        assert_eq!(
            shard_identifiers(&cluster).await,
            Err(ChurnError::NoShards)
        );
    }
}
