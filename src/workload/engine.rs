use super::collection::{Baseline, CollectionDescriptor};
use crate::capabilities::{Capabilities, MutationStrategy};
use crate::client::ClusterClient;
use crate::config::ChurnConfig;
use crate::core::{Namespace, Result, WriteConcern};
use crate::mutation::{PipelineMutation, RandomMutator};
use crate::signal::StopSignal;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-collection state owned by the engine across cycles.
#[derive(Debug, Clone)]
pub struct CollectionState {
    pub descriptor: CollectionDescriptor,
    pub namespace: Namespace,
    pub baseline: Baseline,
}

/// Writes sent during one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStats {
    pub plain_inserts: u64,
    pub plain_deletes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub collection: String,
    pub elapsed: Duration,
    pub stats: WriteStats,
    /// The baseline could not be established; nothing was written.
    pub skipped: bool,
    /// A stop was requested before the cycle ran to completion.
    pub interrupted: bool,
}

/// Steady-state workload: per collection, insert a batch, mutate a random
/// sample, then delete back down to the baseline. Collections are visited in
/// a fixed round-robin order, one phase at a time.
pub struct WorkloadEngine {
    client: Arc<dyn ClusterClient>,
    config: ChurnConfig,
    strategy: MutationStrategy,
    mutator: RandomMutator,
    rng: StdRng,
    collections: Vec<CollectionState>,
    stop: StopSignal,
}

impl WorkloadEngine {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: ChurnConfig,
        capabilities: &Capabilities,
        stop: StopSignal,
    ) -> Self {
        let collections = config
            .descriptors()
            .into_iter()
            .map(|descriptor| CollectionState {
                namespace: descriptor.namespace(&config.database),
                descriptor,
                baseline: Baseline::default(),
            })
            .collect();
        let rng = match config.derived_seed(1) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mutator = RandomMutator::new(config.process_id, config.derived_seed(2));

        Self {
            client,
            strategy: capabilities.strategy(),
            config,
            mutator,
            rng,
            collections,
            stop,
        }
    }

    pub fn strategy(&self) -> MutationStrategy {
        self.strategy
    }

    pub fn collections(&self) -> &[CollectionState] {
        &self.collections
    }

    /// Loops over every collection until a stop is requested. Returns the
    /// number of completed rounds.
    pub async fn run(&mut self) -> u64 {
        info!(
            "Starting workload over {} collections ({} strategy)",
            self.collections.len(),
            self.strategy
        );
        let mut rounds = 0;
        while !self.stop.is_stop_requested() {
            self.run_round().await;
            if !self.stop.is_stop_requested() {
                rounds += 1;
            }
        }
        info!("Stop requested, exiting main loop.");
        rounds
    }

    /// One pass over all collections, stopping early on request.
    pub async fn run_round(&mut self) -> Vec<CycleReport> {
        let mut reports = Vec::with_capacity(self.collections.len());
        for index in 0..self.collections.len() {
            if self.stop.is_stop_requested() {
                break;
            }
            reports.push(self.run_cycle(index).await);
        }
        reports
    }

    /// ESTABLISH_BASELINE → INSERT → MUTATE → DELETE_EXCESS for one collection.
    pub async fn run_cycle(&mut self, index: usize) -> CycleReport {
        let start = Instant::now();
        let ns = self.collections[index].namespace.clone();
        let descriptor = self.collections[index].descriptor;
        let collection = ns.collection.clone();

        let mut report = CycleReport {
            collection: collection.clone(),
            elapsed: Duration::ZERO,
            stats: WriteStats::default(),
            skipped: false,
            interrupted: false,
        };

        let Some(baseline) = self.establish_baseline(index).await else {
            report.skipped = true;
            report.elapsed = start.elapsed();
            return report;
        };

        report.stats.plain_inserts = self.insert_batch(&ns, &descriptor).await;
        if self.stop.is_stop_requested() {
            report.interrupted = true;
        } else {
            self.mutate_sample(&ns).await;
            if self.stop.is_stop_requested() {
                report.interrupted = true;
            } else {
                let (deleted, completed) = self.delete_excess(&ns, baseline).await;
                report.stats.plain_deletes = deleted;
                report.interrupted = !completed && self.stop.is_stop_requested();
            }
        }

        report.elapsed = start.elapsed();
        let rounded_secs = (report.elapsed.as_secs_f64() * 100.0).round() / 100.0;
        let stats = serde_json::to_string(&report.stats).unwrap_or_default();
        info!(
            "{}: Writes sent over {} secs: {}",
            collection, rounded_secs, stats
        );
        report
    }

    async fn establish_baseline(&mut self, index: usize) -> Option<Baseline> {
        let existing = self.collections[index].baseline;
        if existing.get().is_some() {
            return Some(existing);
        }
        let ns = self.collections[index].namespace.clone();
        match self.client.estimated_count(&ns).await {
            Ok(count) => {
                let baseline = &mut self.collections[index].baseline;
                let level = baseline.establish(count);
                info!("{}: baseline document count is {}", ns.collection, level);
                Some(*baseline)
            }
            Err(err) => {
                warn!(
                    "{}: failed to estimate document count: {}",
                    ns.collection, err
                );
                self.pause().await;
                None
            }
        }
    }

    async fn insert_batch(&mut self, ns: &Namespace, descriptor: &CollectionDescriptor) -> u64 {
        let count = self.config.batch_size;
        let padding = "y".repeat(descriptor.document_size_bytes);
        let docs = (0..count)
            .map(|_| descriptor.churn_document(&mut self.rng, &padding))
            .collect();

        info!("{}: Inserting {} documents …", ns.collection, count);
        match self
            .client
            .insert_many(ns, docs, WriteConcern::Acknowledged)
            .await
        {
            Ok(outcome) => {
                if let Some(cause) = &outcome.cause {
                    warn!(
                        "{}: {} of {} inserts rejected: {}",
                        ns.collection, outcome.rejected, count, cause
                    );
                }
                outcome.accepted
            }
            Err(err) => {
                warn!("{}: Failed to insert: {}", ns.collection, err);
                self.pause().await;
                0
            }
        }
    }

    async fn mutate_sample(&mut self, ns: &Namespace) {
        let target = self.config.batch_size;
        let result = match self.strategy {
            MutationStrategy::Pipeline => {
                info!(
                    "{}: Updating {} random early documents …",
                    ns.collection, target
                );
                let mutation = PipelineMutation::new(
                    self.config.update_sample_rate,
                    target,
                    self.config.process_id,
                );
                self.client.merge_pipeline(ns, &mutation).await
            }
            MutationStrategy::DocumentLevel => {
                info!(
                    "{}: Fetching {} random document IDs …",
                    ns.collection, target
                );
                match self.client.sample_ids(ns, target).await {
                    Ok(ids) => {
                        info!("{}: Updating those randomly …", ns.collection);
                        let updates = self.mutator.updates_for(ids);
                        self.client
                            .update_each(ns, updates, WriteConcern::MajorityJournaled)
                            .await
                            .map(|outcome| {
                                if let Some(cause) = outcome.cause {
                                    warn!(
                                        "{}: {} updates rejected: {}",
                                        ns.collection, outcome.rejected, cause
                                    );
                                }
                            })
                    }
                    Err(err) => Err(err),
                }
            }
        };

        if let Err(err) = result {
            warn!("{}: Failed to update: {}", ns.collection, err);
            self.pause().await;
        }
    }

    /// Deletes random documents until the count is back at the baseline.
    /// Returns the number deleted and whether the loop ended normally.
    async fn delete_excess(&mut self, ns: &Namespace, baseline: Baseline) -> (u64, bool) {
        let mut deleted = 0;
        loop {
            let current = match self.client.estimated_count(ns).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(
                        "{}: Failed to estimate count before delete: {}",
                        ns.collection, err
                    );
                    return (deleted, false);
                }
            };
            match baseline.excess(current) {
                Some(excess) if excess >= 1 => {}
                _ => return (deleted, true),
            }

            let batch = match self.strategy {
                MutationStrategy::Pipeline => {
                    info!(
                        "{}: Deleting about {} random documents …",
                        ns.collection,
                        (current as f64 * self.config.delete_sample_rate).round()
                    );
                    self.client
                        .delete_sampled(ns, self.config.delete_sample_rate)
                        .await
                        .map(Some)
                }
                MutationStrategy::DocumentLevel => {
                    self.delete_sampled_ids(ns).await
                }
            };

            match batch {
                Ok(Some(count)) => deleted += count,
                Ok(None) => {
                    debug!("{}: nothing left to sample for deletion", ns.collection);
                    return (deleted, false);
                }
                Err(err) => {
                    warn!("{}: Failed to delete: {}", ns.collection, err);
                    return (deleted, false);
                }
            }

            if self.stop.is_stop_requested() {
                return (deleted, false);
            }
        }
    }

    /// Samples ids and deletes them. Ids are not de-duplicated across
    /// iterations; a repeat simply deletes nothing.
    async fn delete_sampled_ids(&self, ns: &Namespace) -> Result<Option<u64>> {
        let size = self.config.batch_size;
        info!("{}: Fetching {} random document IDs …", ns.collection, size);
        let ids = self.client.sample_ids(ns, size).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        info!("{}: Deleting those {} documents …", ns.collection, ids.len());
        self.client.delete_ids(ns, &ids).await.map(Some)
    }

    async fn pause(&self) {
        if !self.config.failure_pause.is_zero() {
            tokio::time::sleep(self.config.failure_pause).await;
        }
    }
}
