use std::collections::BTreeMap;

use crate::kind::{Partition, ResourceKind};
use crate::xds::Resource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot version must not be empty")]
    EmptyVersion,
}

/// Immutable, versioned bundle of resources for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    version: String,
    partition: Partition,
    resources: BTreeMap<ResourceKind, BTreeMap<String, Resource>>,
}

impl Snapshot {
    /// Group `resources` by kind and name. A later resource with the same kind and
    /// name replaces an earlier one. Kinds are not checked against `partition`: a
    /// push that carries endpoints lands in the endpoint partition whole.
    pub fn new(
        partition: Partition,
        version: impl Into<String>,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Result<Self, SnapshotError> {
        let version = version.into();
        if version.is_empty() {
            return Err(SnapshotError::EmptyVersion);
        }
        let mut by_kind: BTreeMap<ResourceKind, BTreeMap<String, Resource>> = BTreeMap::new();
        for r in resources {
            by_kind.entry(r.kind()).or_default().insert(r.name().to_string(), r);
        }
        Ok(Self { version, partition, resources: by_kind })
    }

    pub fn version(&self) -> &str { &self.version }
    pub fn partition(&self) -> Partition { self.partition }

    pub fn resources(&self, kind: ResourceKind) -> Option<&BTreeMap<String, Resource>> {
        self.resources.get(&kind)
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.resources.get(&kind).and_then(|m| m.get(name))
    }

    /// Kinds present in this snapshot, in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.resources.keys().copied()
    }

    /// Total number of resources across all kinds.
    pub fn len(&self) -> usize {
        self.resources.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
