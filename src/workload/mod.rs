//! Steady-state workload and the synthetic collections it drives.

mod collection;
mod engine;

pub use collection::{
    Baseline, CollectionDescriptor, DEFAULT_DOC_SIZES, IdMode, descriptors, random_string,
    target_document_count,
};
pub use engine::{CollectionState, CycleReport, WorkloadEngine, WriteStats};
