//! [`ClusterClient`] over the official driver.
//!
//! Administrative operations are sent as raw commands against `admin`;
//! collection metadata is read from the `config` database.

use super::ClusterClient;
use crate::core::{
    BatchOutcome, ChurnError, DocId, Document, MoveChunkOptions, Namespace, Result, ShardKey,
    ShardKeyKind, WriteConcern,
};
use crate::mutation::{
    DocumentUpdate, FLAG_FIELD, NOW_FIELD, PipelineMutation, SCORE_FIELD,
    TOUCHED_BY_FIELD, UPDATED_AT_FIELD, VISIT_COUNT_FIELD,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document as BsonDocument, doc, oid::ObjectId};
use mongodb::error::ErrorKind;
use mongodb::options::{Acknowledgment, WriteConcern as DriverConcern};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::debug;

const NAMESPACE_EXISTS: i32 = 48;

pub struct MongoCluster {
    client: Client,
}

impl MongoCluster {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await.map_err(backend)?;
        Ok(Self { client })
    }

    fn admin(&self) -> Database {
        self.client.database("admin")
    }

    fn collection(&self, ns: &Namespace) -> Collection<BsonDocument> {
        self.client.database(&ns.db).collection(&ns.collection)
    }

    async fn admin_command(&self, command: BsonDocument) -> Result<BsonDocument> {
        debug!("admin command: {}", command);
        self.admin().run_command(command).await.map_err(backend)
    }

    async fn collection_metadata(&self, ns: &Namespace) -> Result<Option<BsonDocument>> {
        let meta = self
            .client
            .database("config")
            .collection::<BsonDocument>("collections")
            .find_one(doc! { "_id": ns.to_string() })
            .await
            .map_err(backend)?;
        Ok(meta.filter(|doc| !doc.get_bool("dropped").unwrap_or(false)))
    }
}

fn backend(err: impl std::fmt::Display) -> ChurnError {
    ChurnError::Backend(err.to_string())
}

fn driver_concern(concern: WriteConcern) -> DriverConcern {
    match concern {
        WriteConcern::Acknowledged => DriverConcern::builder()
            .w(Acknowledgment::Nodes(1))
            .build(),
        WriteConcern::Unacknowledged => DriverConcern::builder()
            .w(Acknowledgment::Nodes(0))
            .build(),
        WriteConcern::MajorityJournaled => DriverConcern::builder()
            .w(Acknowledgment::Majority)
            .journal(true)
            .build(),
    }
}

fn concern_document(concern: WriteConcern) -> BsonDocument {
    match concern {
        WriteConcern::Acknowledged => doc! { "w": 1 },
        WriteConcern::Unacknowledged => doc! { "w": 0 },
        WriteConcern::MajorityJournaled => doc! { "w": "majority", "j": true },
    }
}

fn single_field(field: &str, value: impl Into<Bson>) -> BsonDocument {
    let mut doc = BsonDocument::new();
    doc.insert(field, value);
    doc
}

fn key_document(key: &ShardKey) -> BsonDocument {
    let mut doc = BsonDocument::new();
    for (field, kind) in &key.fields {
        let value = match kind {
            ShardKeyKind::Ascending => Bson::Int32(1),
            ShardKeyKind::Hashed => Bson::String("hashed".to_string()),
            ShardKeyKind::Other(raw) => match raw.parse::<i32>() {
                Ok(direction) => Bson::Int32(direction),
                Err(_) => Bson::String(raw.trim_matches('"').to_string()),
            },
        };
        doc.insert(field.as_str(), value);
    }
    doc
}

fn shard_key_from(doc: &BsonDocument) -> ShardKey {
    let fields = doc
        .iter()
        .map(|(field, value)| {
            let kind = match value {
                Bson::String(s) if s == "hashed" => ShardKeyKind::Hashed,
                Bson::Int32(1) | Bson::Int64(1) => ShardKeyKind::Ascending,
                Bson::Double(d) if *d == 1.0 => ShardKeyKind::Ascending,
                other => ShardKeyKind::Other(other.to_string()),
            };
            (field.clone(), kind)
        })
        .collect();
    ShardKey { fields }
}

fn id_to_bson(id: &DocId) -> Bson {
    match id {
        DocId::Number(n) => Bson::Double(*n),
        DocId::Object(hex) => ObjectId::parse_str(hex)
            .map(Bson::ObjectId)
            .unwrap_or_else(|_| Bson::String(hex.clone())),
    }
}

fn id_from_bson(value: &Bson) -> Option<DocId> {
    match value {
        Bson::Double(n) => Some(DocId::Number(*n)),
        Bson::Int32(n) => Some(DocId::Number(f64::from(*n))),
        Bson::Int64(n) => Some(DocId::Number(*n as f64)),
        Bson::ObjectId(oid) => Some(DocId::Object(oid.to_hex())),
        _ => None,
    }
}

fn update_document(update: &DocumentUpdate) -> BsonDocument {
    match update {
        DocumentUpdate::Touch { process_id, at } => {
            let mut set = BsonDocument::new();
            set.insert(TOUCHED_BY_FIELD, i64::from(*process_id));
            set.insert(
                UPDATED_AT_FIELD,
                bson::DateTime::from_millis(at.timestamp_millis()),
            );
            doc! { "$set": set }
        }
        DocumentUpdate::SetFlag(flag) => doc! { "$set": single_field(FLAG_FIELD, *flag) },
        DocumentUpdate::SetScore(score) => doc! { "$set": single_field(SCORE_FIELD, *score) },
        DocumentUpdate::IncrementVisits => doc! { "$inc": single_field(VISIT_COUNT_FIELD, 1) },
        DocumentUpdate::CurrentDate => doc! { "$currentDate": single_field(NOW_FIELD, true) },
    }
}

#[async_trait]
impl ClusterClient for MongoCluster {
    async fn list_shards(&self) -> Result<Vec<String>> {
        let reply = self
            .admin_command(doc! { "listShards": 1 })
            .await
            .map_err(|err| ChurnError::NotSharded(err.to_string()))?;
        let shards = reply.get_array("shards").map_err(backend)?;
        Ok(shards
            .iter()
            .filter_map(|shard| shard.as_document())
            .filter_map(|shard| shard.get_str("_id").ok())
            .map(str::to_string)
            .collect())
    }

    async fn server_version(&self) -> Result<String> {
        let info = self.admin_command(doc! { "buildInfo": 1 }).await?;
        info.get_str("version").map(str::to_string).map_err(backend)
    }

    async fn shard_key(&self, ns: &Namespace) -> Result<Option<ShardKey>> {
        Ok(self
            .collection_metadata(ns)
            .await?
            .and_then(|meta| meta.get_document("key").ok().map(shard_key_from)))
    }

    async fn split_chunk(&self, ns: &Namespace, field: &str, middle: f64) -> Result<()> {
        self.admin_command(doc! {
            "split": ns.to_string(),
            "middle": single_field(field, middle),
        })
        .await
        .map(|_| ())
    }

    async fn move_chunk(
        &self,
        ns: &Namespace,
        field: &str,
        find: f64,
        to_shard: &str,
        options: &MoveChunkOptions,
    ) -> Result<()> {
        self.admin_command(doc! {
            "moveChunk": ns.to_string(),
            "find": single_field(field, find),
            "to": to_shard,
            "_secondaryThrottle": options.secondary_throttle,
            "_waitForDelete": options.wait_for_delete,
            "writeConcern": concern_document(options.write_concern),
        })
        .await
        .map_err(|err| match err {
            ChurnError::Backend(msg) if msg.contains("ShardNotFound") => {
                ChurnError::UnknownShard(to_shard.to_string())
            }
            other => other,
        })
        .map(|_| ())
    }

    async fn stop_balancer(&self) -> Result<()> {
        self.admin_command(doc! { "balancerStop": 1 }).await.map(|_| ())
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        self.client
            .database(db)
            .list_collection_names()
            .await
            .map_err(backend)
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<()> {
        match self
            .client
            .database(&ns.db)
            .create_collection(&ns.collection)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::Command(command) if command.code == NAMESPACE_EXISTS => {
                    Err(ChurnError::NamespaceExists(ns.to_string()))
                }
                _ => Err(backend(err)),
            },
        }
    }

    async fn create_index(&self, ns: &Namespace, key: &ShardKey) -> Result<()> {
        let model = IndexModel::builder().keys(key_document(key)).build();
        self.collection(ns)
            .create_index(model)
            .await
            .map(|_| ())
            .map_err(backend)
    }

    async fn enable_sharding(&self, db: &str) -> Result<()> {
        self.admin_command(doc! { "enableSharding": db })
            .await
            .map(|_| ())
    }

    async fn shard_collection(&self, ns: &Namespace, key: &ShardKey) -> Result<()> {
        self.admin_command(doc! {
            "shardCollection": ns.to_string(),
            "key": key_document(key),
        })
        .await
        .map(|_| ())
    }

    async fn chunk_shards(&self, ns: &Namespace) -> Result<Vec<String>> {
        // Newer servers key chunks by collection uuid instead of namespace.
        let mut filters = vec![doc! { "ns": ns.to_string() }];
        if let Some(uuid) = self
            .collection_metadata(ns)
            .await?
            .and_then(|meta| meta.get("uuid").cloned())
        {
            filters.push(doc! { "uuid": uuid });
        }

        let chunks: Vec<BsonDocument> = self
            .client
            .database("config")
            .collection::<BsonDocument>("chunks")
            .find(doc! { "$or": filters })
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        Ok(chunks
            .iter()
            .filter_map(|chunk| chunk.get_str("shard").ok())
            .map(str::to_string)
            .collect())
    }

    async fn insert_many(
        &self,
        ns: &Namespace,
        docs: Vec<Document>,
        concern: WriteConcern,
    ) -> Result<BatchOutcome> {
        let total = docs.len() as u64;
        let docs = docs
            .iter()
            .map(bson::to_document)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(backend)?;

        let result = self
            .collection(ns)
            .insert_many(docs)
            .ordered(false)
            .write_concern(driver_concern(concern))
            .await;

        match result {
            Ok(_) if concern == WriteConcern::Unacknowledged => Ok(BatchOutcome::default()),
            Ok(inserted) => Ok(BatchOutcome::accepted(inserted.inserted_ids.len() as u64)),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::InsertMany(failure) => {
                    let errors = failure.write_errors.as_deref().unwrap_or_default();
                    let mut outcome = BatchOutcome::accepted(total - errors.len() as u64);
                    for error in errors {
                        outcome.record_rejection(error.message.clone());
                    }
                    Ok(outcome)
                }
                _ => Err(backend(err)),
            },
        }
    }

    async fn update_each(
        &self,
        ns: &Namespace,
        updates: Vec<(DocId, DocumentUpdate)>,
        concern: WriteConcern,
    ) -> Result<BatchOutcome> {
        if updates.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let statements: Vec<BsonDocument> = updates
            .iter()
            .map(|(id, update)| {
                doc! {
                    "q": { "_id": id_to_bson(id) },
                    "u": update_document(update),
                }
            })
            .collect();

        let reply = self
            .client
            .database(&ns.db)
            .run_command(doc! {
                "update": ns.collection.as_str(),
                "updates": statements,
                "ordered": false,
                "writeConcern": concern_document(concern),
            })
            .await
            .map_err(backend)?;

        let matched = reply
            .get_i32("n")
            .map(i64::from)
            .or_else(|_| reply.get_i64("n"))
            .unwrap_or(0);
        let mut outcome = BatchOutcome::accepted(matched.max(0) as u64);
        if let Ok(errors) = reply.get_array("writeErrors") {
            for error in errors.iter().filter_map(Bson::as_document) {
                outcome.record_rejection(error.get_str("errmsg").unwrap_or("write error"));
            }
        }
        Ok(outcome)
    }

    async fn merge_pipeline(&self, ns: &Namespace, mutation: &PipelineMutation) -> Result<()> {
        let pipeline = mutation
            .stages(&ns.collection)
            .iter()
            .map(bson::to_document)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(backend)?;
        debug!("{}: running sampled update pipeline", ns);
        let _: Vec<BsonDocument> = self
            .collection(ns)
            .aggregate(pipeline)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn sample_ids(&self, ns: &Namespace, size: usize) -> Result<Vec<DocId>> {
        let pipeline = vec![
            doc! { "$sample": { "size": size as i64 } },
            doc! { "$project": { "_id": 1 } },
        ];
        let docs: Vec<BsonDocument> = self
            .collection(ns)
            .aggregate(pipeline)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        Ok(docs
            .iter()
            .filter_map(|doc| doc.get("_id"))
            .filter_map(id_from_bson)
            .collect())
    }

    async fn delete_sampled(&self, ns: &Namespace, rate: f64) -> Result<u64> {
        self.collection(ns)
            .delete_many(doc! { "$sampleRate": rate })
            .await
            .map(|result| result.deleted_count)
            .map_err(backend)
    }

    async fn delete_ids(&self, ns: &Namespace, ids: &[DocId]) -> Result<u64> {
        let ids: Vec<Bson> = ids.iter().map(id_to_bson).collect();
        self.collection(ns)
            .delete_many(doc! { "_id": { "$in": ids } })
            .await
            .map(|result| result.deleted_count)
            .map_err(backend)
    }

    async fn estimated_count(&self, ns: &Namespace) -> Result<u64> {
        self.collection(ns)
            .estimated_document_count()
            .await
            .map_err(backend)
    }
}
