use serde_json::json;
use shardchurn::mutation::{FLAG_FIELD, NOW_FIELD, SCORE_FIELD, TOUCHED_BY_FIELD, VISIT_COUNT_FIELD};
use shardchurn::{
    Capabilities, ChurnConfig, ClusterClient, Document, FailurePoint, IdMode, MemoryCluster,
    MutationStrategy, Namespace, StopSignal, WorkloadEngine, WriteConcern, initial_load,
    prepare_collections,
};
use std::sync::Arc;
use std::time::Duration;

fn ns() -> Namespace {
    Namespace::new("test", "customID_100")
}

fn config() -> ChurnConfig {
    ChurnConfig::new()
        .doc_sizes(vec![100])
        .id_modes(vec![IdMode::ClientAssigned])
        .batch_size(50)
        .delete_sample_rate(0.2)
        .failure_pause(Duration::ZERO)
        .process_id(4242)
        .seed(99)
}

async fn preloaded(count: usize) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::sharded(3).with_seed(5));
    let docs: Vec<Document> = (0..count)
        .map(|i| {
            let mut doc = Document::new();
            doc.insert("_id".into(), json!(i as f64 / count as f64));
            doc.insert("oldField".into(), json!("abc"));
            doc
        })
        .collect();
    cluster
        .insert_many(&ns(), docs, WriteConcern::Acknowledged)
        .await
        .unwrap();
    cluster
}

fn engine(cluster: &Arc<MemoryCluster>, version: &str, stop: StopSignal) -> WorkloadEngine {
    let caps = Capabilities::resolve(version).unwrap();
    WorkloadEngine::new(cluster.clone(), config(), &caps, stop)
}

fn was_mutated(doc: &Document) -> bool {
    [
        TOUCHED_BY_FIELD,
        FLAG_FIELD,
        SCORE_FIELD,
        VISIT_COUNT_FIELD,
        NOW_FIELD,
    ]
    .iter()
    .any(|field| doc.contains_key(*field))
}

#[tokio::test]
async fn test_document_level_cycle_restores_baseline() {
    let cluster = preloaded(100).await;
    let mut engine = engine(&cluster, "4.2.0", StopSignal::new());
    assert_eq!(engine.strategy(), MutationStrategy::DocumentLevel);

    let report = engine.run_cycle(0).await;
    assert!(!report.skipped);
    assert!(!report.interrupted);
    assert_eq!(report.stats.plain_inserts, 50);
    assert_eq!(report.stats.plain_deletes, 50);
    assert_eq!(engine.collections()[0].baseline.get(), Some(100));
    assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 100);

    assert_eq!(
        cluster.last_insert_concern().await,
        Some(WriteConcern::Acknowledged)
    );
    assert_eq!(
        cluster.last_update_concern().await,
        Some(WriteConcern::MajorityJournaled)
    );

    let docs = cluster.documents(&ns()).await;
    assert!(docs.iter().any(was_mutated));
    assert!(
        docs.iter()
            .filter(|doc| doc.contains_key(TOUCHED_BY_FIELD))
            .all(|doc| doc[TOUCHED_BY_FIELD] == json!(4242))
    );
}

#[tokio::test]
async fn test_pipeline_cycle_never_ends_above_baseline() {
    let cluster = preloaded(100).await;
    let mut engine = engine(&cluster, "6.0.1", StopSignal::new());
    assert_eq!(engine.strategy(), MutationStrategy::Pipeline);

    let report = engine.run_cycle(0).await;
    assert_eq!(report.stats.plain_inserts, 50);
    assert!(cluster.estimated_count(&ns()).await.unwrap() <= 100);

    let docs = cluster.documents(&ns()).await;
    assert!(docs.iter().all(|doc| !doc.contains_key("randVal")));
}

#[tokio::test]
async fn test_baseline_is_kept_across_cycles() {
    let cluster = preloaded(100).await;
    let mut engine = engine(&cluster, "4.2.0", StopSignal::new());

    for _ in 0..3 {
        engine.run_cycle(0).await;
        assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 100);
    }
    assert_eq!(engine.collections()[0].baseline.get(), Some(100));
}

#[tokio::test]
async fn test_insert_failure_does_not_abort_cycle() {
    let cluster = preloaded(100).await;
    cluster.fail_next(FailurePoint::Insert, 1).await;
    let mut engine = engine(&cluster, "4.2.0", StopSignal::new());

    let report = engine.run_cycle(0).await;
    assert_eq!(report.stats.plain_inserts, 0);
    assert_eq!(report.stats.plain_deletes, 0);
    assert!(!report.interrupted);
    assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 100);
}

#[tokio::test]
async fn test_update_failure_still_trims() {
    let cluster = preloaded(100).await;
    cluster.fail_next(FailurePoint::Update, 1).await;
    let mut engine = engine(&cluster, "4.2.0", StopSignal::new());

    let report = engine.run_cycle(0).await;
    assert_eq!(report.stats.plain_inserts, 50);
    assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 100);
    let docs = cluster.documents(&ns()).await;
    assert!(!docs.iter().any(was_mutated));
}

#[tokio::test]
async fn test_delete_failure_recovers_next_cycle() {
    let cluster = preloaded(100).await;
    cluster.fail_next(FailurePoint::Delete, 1).await;
    let mut engine = engine(&cluster, "4.2.0", StopSignal::new());

    let report = engine.run_cycle(0).await;
    assert_eq!(report.stats.plain_deletes, 0);
    assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 150);

    let report = engine.run_cycle(0).await;
    assert_eq!(report.stats.plain_deletes, 100);
    assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 100);
}

#[tokio::test]
async fn test_stop_before_start_writes_nothing() {
    let cluster = preloaded(100).await;
    let stop = StopSignal::new();
    stop.request_stop();
    let mut engine = engine(&cluster, "6.0.1", stop);

    assert_eq!(engine.run().await, 0);
    assert!(engine.collections()[0].baseline.get().is_none());
    assert_eq!(cluster.estimated_count(&ns()).await.unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_exits_after_stop_request() {
    let cluster = preloaded(100).await;
    let stop = StopSignal::new();
    let mut engine = engine(&cluster, "4.2.0", stop.clone());

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.request_stop();
    });

    tokio::time::timeout(Duration::from_secs(30), engine.run())
        .await
        .expect("engine did not stop");
    stopper.await.unwrap();
    assert!(cluster.estimated_count(&ns()).await.unwrap() >= 100);
}

#[tokio::test]
async fn test_setup_load_and_churn_on_sharded_cluster() {
    let cluster = Arc::new(MemoryCluster::sharded(2).with_seed(8));
    let config = ChurnConfig::new()
        .doc_sizes(vec![100])
        .bytes_per_shard(10_000)
        .batch_size(20)
        .failure_pause(Duration::ZERO)
        .seed(3);

    prepare_collections(cluster.as_ref(), &config).await.unwrap();
    let progress = initial_load(cluster.as_ref(), &config, &StopSignal::new())
        .await
        .unwrap();
    assert!(progress.iter().all(|entry| entry.reached));

    let caps = Capabilities::resolve("4.2.0").unwrap();
    let mut engine = WorkloadEngine::new(cluster.clone(), config, &caps, StopSignal::new());
    let reports = engine.run_round().await;
    assert_eq!(reports.len(), 2);

    for state in engine.collections() {
        let baseline = state.baseline.get().unwrap();
        assert_eq!(baseline, 100);
        assert_eq!(
            cluster.estimated_count(&state.namespace).await.unwrap(),
            baseline
        );
    }

    // Client-assigned keys stay spread over both pre-split chunks.
    let spread = cluster
        .documents_per_shard(&Namespace::new("test", "customID_100"))
        .await;
    assert_eq!(spread.len(), 2);
}
