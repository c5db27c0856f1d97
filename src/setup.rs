//! One-time cluster preparation and the initial bulk load.

use crate::client::ClusterClient;
use crate::config::ChurnConfig;
use crate::core::{ChurnError, Result, ShardKey, WriteConcern};
use crate::presplit::{PreSplitReport, pre_split};
use crate::signal::StopSignal;
use crate::topology::ShardTopology;
use crate::workload::{CollectionDescriptor, IdMode, target_document_count};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Upper end of the client-assigned key space, which is `[0, 1)`.
pub const CLIENT_KEY_MAX: f64 = 1.0;

/// What happened to one collection during [`prepare_collections`].
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedCollection {
    AlreadyExisted,
    Created,
    Presplit(PreSplitReport),
    HashedDistributed,
}

/// Creates every collection and, on sharded clusters, shards it.
///
/// The balancer is stopped first. Client-assigned collections are sharded on
/// `{_id: 1}` and pre-split over `[0, 1]`; sequential collections are sharded
/// on `{_id: "hashed"}`, whose initial chunks must already cover every shard.
/// Existing collections are left untouched.
pub async fn prepare_collections(
    client: &dyn ClusterClient,
    config: &ChurnConfig,
) -> Result<Vec<(String, PreparedCollection)>> {
    let topology = ShardTopology::observe(client).await?;
    if topology.sharded {
        client.stop_balancer().await?;
        info!("Balancer stopped.");
    }

    let existing: BTreeSet<String> = client
        .list_collections(&config.database)
        .await?
        .into_iter()
        .collect();

    let mut prepared = Vec::new();
    for descriptor in config.descriptors() {
        let name = descriptor.name();
        let outcome = if existing.contains(&name) {
            info!("Collection “{}” already exists.", name);
            PreparedCollection::AlreadyExisted
        } else {
            prepare_collection(client, config, &topology, &descriptor).await?
        };
        prepared.push((name, outcome));
    }
    Ok(prepared)
}

async fn prepare_collection(
    client: &dyn ClusterClient,
    config: &ChurnConfig,
    topology: &ShardTopology,
    descriptor: &CollectionDescriptor,
) -> Result<PreparedCollection> {
    let ns = descriptor.namespace(&config.database);
    info!("Creating collection: {}", ns.collection);
    match client.create_collection(&ns).await {
        Ok(()) => {}
        Err(ChurnError::NamespaceExists(_)) => {
            info!("Collection “{}” already existed.", ns.collection);
        }
        Err(err) => return Err(err),
    }

    if !topology.sharded {
        return Ok(PreparedCollection::Created);
    }

    client.enable_sharding(&ns.db).await?;

    if descriptor.uses_client_assigned_key() {
        info!("Sharding collection {} …", ns.collection);
        client
            .shard_collection(&ns, &ShardKey::ascending("_id"))
            .await?;
        info!("Pre-splitting {} …", ns.collection);
        let report = pre_split(client, &ns.to_string(), "_id", 0.0, CLIENT_KEY_MAX).await?;
        return Ok(PreparedCollection::Presplit(report));
    }

    let key = ShardKey::hashed("_id");
    client.create_index(&ns, &key).await?;
    info!("Sharding collection {} …", ns.collection);
    client.shard_collection(&ns, &key).await?;

    let covered: BTreeSet<String> = client.chunk_shards(&ns).await?.into_iter().collect();
    if covered.len() == topology.shard_count() {
        info!("Forgoing split of {}; already split.", ns.collection);
        Ok(PreparedCollection::HashedDistributed)
    } else {
        Err(ChurnError::ChunksNotDistributed {
            namespace: ns.to_string(),
            covered: covered.len(),
            shards: topology.shard_count(),
        })
    }
}

/// Per-collection progress of the initial load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub collection: String,
    pub target: u64,
    pub batches_sent: u64,
    pub reached: bool,
}

/// Fills every collection with unacknowledged, unordered batches until each
/// reaches its share of the data volume or a stop is requested.
///
/// Collections are visited id-mode first, then size; a collection that has
/// reached its target is skipped. Failed batches are logged and retried on
/// the next round.
pub async fn initial_load(
    client: &dyn ClusterClient,
    config: &ChurnConfig,
    stop: &StopSignal,
) -> Result<Vec<LoadProgress>> {
    let topology = ShardTopology::observe(client).await?;
    let shard_count = if topology.sharded {
        topology.shard_count()
    } else {
        1
    };
    let collection_bytes = config.collection_bytes(shard_count);

    let mut order: Vec<CollectionDescriptor> = config.descriptors();
    order.sort_by_key(|d| (d.id_mode != IdMode::ClientAssigned, d.document_size_bytes));

    let mut progress: Vec<LoadProgress> = order
        .iter()
        .map(|descriptor| {
            let target = target_document_count(collection_bytes, descriptor);
            info!(
                "{}: approx docs count target {}",
                descriptor.name(),
                target
            );
            LoadProgress {
                collection: descriptor.name(),
                target,
                batches_sent: 0,
                reached: false,
            }
        })
        .collect();

    let mut rng = match config.derived_seed(3) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    while !stop.is_stop_requested() && progress.iter().any(|p| !p.reached) {
        for (descriptor, entry) in order.iter().zip(progress.iter_mut()) {
            if stop.is_stop_requested() {
                break;
            }
            if entry.reached {
                continue;
            }
            let ns = descriptor.namespace(&config.database);
            match client.estimated_count(&ns).await {
                Ok(count) if count >= entry.target => {
                    info!("{}: reached {} documents", ns.collection, count);
                    entry.reached = true;
                    continue;
                }
                Ok(_) => {}
                Err(err) => warn!("{}: failed to estimate count: {}", ns.collection, err),
            }

            info!("Inserting into {} …", ns.collection);
            let padding = "x".repeat(descriptor.document_size_bytes);
            let docs = (0..config.batch_size)
                .map(|_| descriptor.seed_document(&mut rng, &padding))
                .collect();
            match client
                .insert_many(&ns, docs, WriteConcern::Unacknowledged)
                .await
            {
                Ok(_) => entry.batches_sent += 1,
                Err(err) => {
                    warn!("{}: Failed to insert: {}", ns.collection, err);
                    if !config.failure_pause.is_zero() {
                        tokio::time::sleep(config.failure_pause).await;
                    }
                }
            }
        }
    }

    Ok(progress)
}
