pub mod error;
pub mod types;

pub use error::{ChurnError, Result};
pub use types::{
    BatchOutcome, DocId, Document, MoveChunkOptions, Namespace, ShardKey, ShardKeyKind,
    WriteConcern,
};
