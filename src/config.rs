use crate::workload::{CollectionDescriptor, DEFAULT_DOC_SIZES, IdMode, descriptors};
use std::time::Duration;

pub const DEFAULT_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE: &str = "test";
pub const ONE_TIB: u64 = 1 << 40;

/// Load generator configuration
///
/// Everything the engine and the setup steps need besides the cluster
/// itself. Built with chained setters on top of [`ChurnConfig::new`] or
/// [`ChurnConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ChurnConfig {
    /// Connection string for the driver backend
    pub uri: String,

    /// Database holding the generated collections
    pub database: String,

    /// Document size classes in bytes
    pub doc_sizes: Vec<usize>,

    /// Primary key strategies
    pub id_modes: Vec<IdMode>,

    /// Documents inserted per collection per cycle, also the sample size of
    /// the document-level update and delete paths
    pub batch_size: usize,

    /// `$sampleRate` of the pipeline update
    pub update_sample_rate: f64,

    /// `$sampleRate` of the pipeline delete
    pub delete_sample_rate: f64,

    /// Back-off after a failed insert, update or count
    pub failure_pause: Duration,

    /// Data volume the initial load aims for, per shard
    pub bytes_per_shard: u64,

    /// Recorded as `touchedByProcess`
    pub process_id: u32,

    /// Seed for every random source; entropy when unset
    pub seed: Option<u64>,
}

impl ChurnConfig {
    pub fn new() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            doc_sizes: DEFAULT_DOC_SIZES.to_vec(),
            id_modes: IdMode::ALL.to_vec(),
            batch_size: 50_000,
            update_sample_rate: 0.01,
            delete_sample_rate: 0.0001,
            failure_pause: Duration::from_secs(3),
            bytes_per_shard: ONE_TIB,
            process_id: std::process::id(),
            seed: None,
        }
    }

    /// Defaults overridden by `MONGODB_URI` and `SHARDCHURN_DB`.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            if !uri.trim().is_empty() {
                config.uri = uri;
            }
        }
        if let Ok(db) = std::env::var("SHARDCHURN_DB") {
            if !db.trim().is_empty() {
                config.database = db;
            }
        }
        config
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_string();
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn doc_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.doc_sizes = sizes;
        self
    }

    pub fn id_modes(mut self, modes: Vec<IdMode>) -> Self {
        self.id_modes = modes;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn update_sample_rate(mut self, rate: f64) -> Self {
        self.update_sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn delete_sample_rate(mut self, rate: f64) -> Self {
        self.delete_sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn failure_pause(mut self, pause: Duration) -> Self {
        self.failure_pause = pause;
        self
    }

    pub fn bytes_per_shard(mut self, bytes: u64) -> Self {
        self.bytes_per_shard = bytes;
        self
    }

    pub fn process_id(mut self, pid: u32) -> Self {
        self.process_id = pid;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The fixed set of collections, in visiting order.
    pub fn descriptors(&self) -> Vec<CollectionDescriptor> {
        descriptors(&self.doc_sizes, &self.id_modes)
    }

    /// Bytes each collection should hold after the initial load.
    pub fn collection_bytes(&self, shard_count: usize) -> u64 {
        let collections = (self.doc_sizes.len() * self.id_modes.len()).max(1) as u64;
        self.bytes_per_shard * shard_count as u64 / collections
    }

    /// Derives an independent seed for one consumer, keeping runs with a
    /// fixed seed reproducible.
    pub(crate) fn derived_seed(&self, stream: u64) -> Option<u64> {
        self.seed
            .map(|seed| seed ^ stream.wrapping_mul(0x9e3779b97f4a7c15))
    }
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChurnConfig::new();
        assert_eq!(config.database, "test");
        assert_eq!(config.batch_size, 50_000);
        assert_eq!(config.descriptors().len(), 6);
        assert_eq!(config.failure_pause, Duration::from_secs(3));
    }

    #[test]
    fn test_builder_clamps() {
        let config = ChurnConfig::new()
            .batch_size(0)
            .delete_sample_rate(3.0)
            .update_sample_rate(-1.0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.delete_sample_rate, 1.0);
        assert_eq!(config.update_sample_rate, 0.0);
    }

    #[test]
    fn test_collection_bytes_split_evenly() {
        let config = ChurnConfig::new();
        assert_eq!(config.collection_bytes(3), ONE_TIB * 3 / 6);
        assert_eq!(config.collection_bytes(0), 0);
    }

    #[test]
    fn test_derived_seeds_differ() {
        let config = ChurnConfig::new().seed(5);
        assert_ne!(config.derived_seed(1), config.derived_seed(2));
        assert_eq!(ChurnConfig::new().derived_seed(1), None);
    }
}
