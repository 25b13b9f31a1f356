//! kxds core types: the xDS resource model, kind/partition classification,
//! snapshots and change detection shared by every other crate.

#![forbid(unsafe_code)]

pub mod hash;
pub mod kind;
pub mod observe;
pub mod snapshot;
pub mod xds;

pub use hash::{resource_hash, ChangeDetector, Decision, HashError};
pub use kind::{Partition, ResourceKind};
pub use observe::{NoopObserver, Observers, PipelineObserver, TracingObserver};
pub use snapshot::{Snapshot, SnapshotError};
pub use xds::Resource;

/// Node identity every snapshot is written under while no client is tracked.
pub const DEFAULT_NODE_ID: &str = "default";

/// Errors surfaced to observers while a batch moves through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("hashing resources: {0}")]
    Hash(#[from] HashError),
    #[error("building snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("applying snapshot {version} to node {identity}: {message}")]
    Store { identity: String, version: String, message: String },
}

impl PipelineError {
    /// Short label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Hash(_) => "hash",
            PipelineError::Snapshot(_) => "snapshot",
            PipelineError::Store { .. } => "store",
        }
    }
}

/// Push entry point the reflectors publish through.
pub trait SnapshotSetter: Send + Sync {
    /// Publish `resources` as `version`, routing by kind. An empty push has no kind
    /// to route by and lands in `empty_route`. Returns the partition written.
    fn set_routed(&self, version: &str, resources: Vec<Resource>, empty_route: Partition) -> Result<Partition, PipelineError>;

    fn set(&self, version: &str, resources: Vec<Resource>) -> Result<Partition, PipelineError> {
        self.set_routed(version, resources, Partition::Mixed)
    }
}

pub mod prelude {
    pub use super::{
        ChangeDetector, Decision, Partition, PipelineError, PipelineObserver, Resource, ResourceKind, Snapshot,
        SnapshotSetter, DEFAULT_NODE_ID,
    };
}
