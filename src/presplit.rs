//! Manual chunk pre-splitting.
//!
//! For a collection sharded on a single ascending numeric field, the key range
//! `[min, max]` is cut into N equal chunks (N = shard count) and chunk `i` is
//! moved to shard `i`. This spreads a uniformly distributed key evenly before
//! any traffic arrives, with the balancer switched off.
//!
//! Chunk ranges:
//!
//! ```text
//! 0:     [min,                   min + (max-min)/N)
//! i:     [min + (max-min)*i/N,   min + (max-min)*(i+1)/N)
//! N-1:   [min + (max-min)(N-1)/N, max]
//! ```
//!
//! Every split and every move is idempotent, so a failed run is repaired by
//! running it again.

use crate::client::ClusterClient;
use crate::core::{ChurnError, MoveChunkOptions, Namespace, Result, ShardKey, ShardKeyKind};
use crate::topology::shard_identifiers;
use tracing::{info, warn};

/// Numeric interval over the shard key domain, `[min, max)`, or `[min, max]`
/// when `closed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyRange {
    pub min: f64,
    pub max: f64,
    pub closed: bool,
}

impl KeyRange {
    /// The full, closed range `[min, max]`.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ChurnError::InvalidKeyRange { min, max });
        }
        Ok(Self {
            min,
            max,
            closed: true,
        })
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, key: f64) -> bool {
        key >= self.min && (key < self.max || (self.closed && key == self.max))
    }

    /// `i`-th of `n` evenly spaced cut points; `0` and `n` are the range ends.
    fn cut(&self, n: usize, i: usize) -> f64 {
        if i == 0 {
            self.min
        } else if i >= n {
            self.max
        } else {
            self.min + (self.max - self.min) * (i as f64 / n as f64)
        }
    }
}

/// The `n - 1` interior split points, strictly increasing.
pub fn split_boundaries(range: &KeyRange, n: usize) -> Vec<f64> {
    (1..n).map(|i| range.cut(n, i)).collect()
}

/// Conceptual range of chunk `i` out of `n`. Only the last chunk is closed.
pub fn chunk_range(range: &KeyRange, n: usize, i: usize) -> KeyRange {
    KeyRange {
        min: range.cut(n, i),
        max: range.cut(n, i + 1),
        closed: i + 1 >= n,
    }
}

pub fn chunk_ranges(range: &KeyRange, n: usize) -> Vec<KeyRange> {
    (0..n).map(|i| chunk_range(range, n, i)).collect()
}

/// Checks that `key` is a single ascending field named `field`.
pub fn validate_shard_key(key: &ShardKey, field: &str) -> Result<()> {
    match key.single_field() {
        Some((name, kind)) if name == field => match kind {
            ShardKeyKind::Ascending => Ok(()),
            ShardKeyKind::Hashed => Err(ChurnError::HashedShardKey(field.to_string())),
            ShardKeyKind::Other(_) => Err(ChurnError::UnknownShardKey(key.to_string())),
        },
        _ => Err(ChurnError::ShardKeyMismatch {
            expected: field.to_string(),
            actual: key.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreSplitReport {
    pub shard_count: usize,
    pub splits_succeeded: usize,
    pub splits_failed: usize,
    pub moves_succeeded: usize,
    pub moves_failed: usize,
}

impl PreSplitReport {
    pub fn is_complete(&self) -> bool {
        self.splits_failed == 0 && self.moves_failed == 0
    }
}

/// Creates one chunk per shard over `[min, max]` and moves chunk `i` to the
/// `i`-th shard (shards in sorted order).
///
/// Precondition violations are fatal. Individual split or move failures are
/// logged and counted in the report; re-run to repair them.
pub async fn pre_split(
    client: &dyn ClusterClient,
    namespace: &str,
    shard_key_field: &str,
    min: f64,
    max: f64,
) -> Result<PreSplitReport> {
    let ns = Namespace::parse(namespace)?;
    let range = KeyRange::new(min, max)?;
    let shards: Vec<String> = shard_identifiers(client).await?.into_iter().collect();

    let key = client
        .shard_key(&ns)
        .await?
        .ok_or_else(|| ChurnError::CollectionNotSharded(ns.to_string()))?;
    validate_shard_key(&key, shard_key_field)?;

    let shard_count = shards.len();
    info!(
        "Using namespace {} with {} shards. (range: {} - {})",
        ns, shard_count, min, max
    );

    let mut report = PreSplitReport {
        shard_count,
        ..Default::default()
    };

    for boundary in split_boundaries(&range, shard_count) {
        info!("Splitting at {} = {}...", shard_key_field, boundary);
        match client.split_chunk(&ns, shard_key_field, boundary).await {
            Ok(()) => {
                report.splits_succeeded += 1;
                info!("Split at {} succeeded.", boundary);
            }
            Err(err) => {
                report.splits_failed += 1;
                warn!("split at {} failed: {}", boundary, err);
            }
        }
    }

    let options = MoveChunkOptions::default();
    for (chunk, to_shard) in chunk_ranges(&range, shard_count).iter().zip(&shards) {
        let find = chunk.midpoint();
        info!(
            "Moving chunk containing {} ≈ {} (range [{}, {}]) to shard {}...",
            shard_key_field, find, chunk.min, chunk.max, to_shard
        );
        match client
            .move_chunk(&ns, shard_key_field, find, to_shard, &options)
            .await
        {
            Ok(()) => {
                report.moves_succeeded += 1;
                info!("moveChunk to {} succeeded.", to_shard);
            }
            Err(err) => {
                report.moves_failed += 1;
                warn!("moveChunk to {} failed: {}", to_shard, err);
            }
        }
    }

    info!("Done: created one chunk per shard and moved each to its target shard.");
    Ok(report)
}
