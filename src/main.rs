use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use shardchurn::{
    Capabilities, ChurnConfig, ClusterClient, MemoryCluster, StopSignal, WorkloadEngine,
    initial_load, install_stop_handlers, pre_split, prepare_collections,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardchurn")]
#[command(about = "Steady-state write load and chunk pre-splitting for sharded clusters")]
struct Cli {
    /// Store the commands are sent to
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Connection string, overrides MONGODB_URI
    #[arg(long)]
    uri: Option<String>,

    /// Database holding the generated collections, overrides SHARDCHURN_DB
    #[arg(long)]
    db: Option<String>,

    /// Shard count of the in-memory cluster
    #[arg(long, default_value_t = 3)]
    shards: usize,

    /// Version reported by the in-memory cluster
    #[arg(long, default_value = "7.0.0")]
    server_version: String,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Back-off after a failed write, in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    Mongodb,
}

#[derive(Subcommand)]
enum Command {
    /// Create, shard and pre-split the generated collections
    Setup,
    /// Fill the collections up to their share of the data volume
    InitialLoad,
    /// Run the steady-state workload until stopped
    Churn,
    /// Split a collection's key range evenly across the shards
    Presplit {
        #[arg(long)]
        ns: String,
        #[arg(long, default_value = "_id")]
        field: String,
        #[arg(long)]
        min: f64,
        #[arg(long)]
        max: f64,
    },
    /// Print what the server version allows
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli);
    let client = connect(&cli, &config).await?;

    let stop = StopSignal::new();
    install_stop_handlers(&stop);

    match cli.command.unwrap_or(Command::Churn) {
        Command::Setup => {
            let prepared = prepare_collections(client.as_ref(), &config)
                .await
                .context("cluster setup failed")?;
            for (name, outcome) in prepared {
                info!("{}: {:?}", name, outcome);
            }
        }
        Command::InitialLoad => {
            let progress = initial_load(client.as_ref(), &config, &stop)
                .await
                .context("initial load failed")?;
            for entry in progress {
                info!(
                    "{}: {} batches sent, target {} {}",
                    entry.collection,
                    entry.batches_sent,
                    entry.target,
                    if entry.reached { "reached" } else { "not reached" }
                );
            }
        }
        Command::Churn => {
            let capabilities = resolve_capabilities(client.as_ref()).await?;
            let mut engine = WorkloadEngine::new(client, config, &capabilities, stop);
            let rounds = engine.run().await;
            info!("Completed {} rounds.", rounds);
        }
        Command::Presplit {
            ns,
            field,
            min,
            max,
        } => {
            let report = pre_split(client.as_ref(), &ns, &field, min, max)
                .await
                .with_context(|| format!("pre-split of {} failed", ns))?;
            info!("{:?}", report);
            if !report.is_complete() {
                return Err(anyhow!(
                    "{} split(s) and {} move(s) failed",
                    report.splits_failed,
                    report.moves_failed
                ));
            }
        }
        Command::Capabilities => {
            let capabilities = resolve_capabilities(client.as_ref()).await?;
            println!("{}", capabilities.version);
            println!(
                "pipeline updates:          {}",
                capabilities.supports_pipeline_update
            );
            println!(
                "timeseries:                {}",
                capabilities.supports_timeseries
            );
            println!(
                "timeseries delete w/o meta: {}",
                capabilities.supports_delete_on_timeseries_without_meta
            );
            println!("mutation strategy:         {}", capabilities.strategy());
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> ChurnConfig {
    let mut config = ChurnConfig::from_env();
    if let Some(uri) = &cli.uri {
        config = config.uri(uri);
    }
    if let Some(db) = &cli.db {
        config = config.database(db);
    }
    if let Some(size) = cli.batch_size {
        config = config.batch_size(size);
    }
    if let Some(ms) = cli.pause_ms {
        config = config.failure_pause(Duration::from_millis(ms));
    }
    if let Some(seed) = cli.seed {
        config = config.seed(seed);
    }
    config
}

async fn connect(cli: &Cli, config: &ChurnConfig) -> Result<Arc<dyn ClusterClient>> {
    match cli.backend {
        Backend::Memory => {
            info!(
                "Using in-memory cluster with {} shards (version {})",
                cli.shards, cli.server_version
            );
            let mut cluster = if cli.shards == 0 {
                MemoryCluster::replica_set()
            } else {
                MemoryCluster::sharded(cli.shards)
            };
            cluster = cluster.with_version(cli.server_version.clone());
            if let Some(seed) = cli.seed {
                cluster = cluster.with_seed(seed);
            }
            Ok(Arc::new(cluster))
        }
        Backend::Mongodb => connect_driver(config).await,
    }
}

#[cfg(feature = "mongodb")]
async fn connect_driver(config: &ChurnConfig) -> Result<Arc<dyn ClusterClient>> {
    info!("Connecting to {}", config.uri);
    let cluster = shardchurn::MongoCluster::connect(&config.uri)
        .await
        .with_context(|| format!("failed to connect to {}", config.uri))?;
    Ok(Arc::new(cluster))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_driver(config: &ChurnConfig) -> Result<Arc<dyn ClusterClient>> {
    Err(anyhow!(
        "cannot connect to {}: built without the `mongodb` feature",
        config.uri
    ))
}

async fn resolve_capabilities(client: &dyn ClusterClient) -> Result<Capabilities> {
    let version = client
        .server_version()
        .await
        .context("failed to query server version")?;
    let capabilities = Capabilities::resolve(&version)
        .with_context(|| format!("unsupported server version {}", version))?;
    info!(
        "Server version {} uses the {} mutation strategy",
        version,
        capabilities.strategy()
    );
    Ok(capabilities)
}
