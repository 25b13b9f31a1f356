use std::sync::Arc;

use kxds_core::{Partition, PipelineError, Resource, ResourceKind, Snapshot, SnapshotSetter, DEFAULT_NODE_ID};
use tracing::{debug, warn};

use crate::SnapshotStore;

/// Builds one snapshot per push and applies it to every node of the target partition.
pub struct SnapshotDistributor {
    store: Arc<dyn SnapshotStore>,
    default_identity: String,
}

impl SnapshotDistributor {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store, default_identity: DEFAULT_NODE_ID.to_string() }
    }

    /// Identity written while the target partition tracks no node yet.
    pub fn with_default_identity(mut self, identity: impl Into<String>) -> Self {
        self.default_identity = identity.into();
        self
    }

    pub fn classify(kind: ResourceKind) -> Partition {
        kind.partition()
    }

    /// Any endpoint resource sends the whole push to the endpoint partition; `None`
    /// for an empty push.
    pub fn route(resources: &[Resource]) -> Option<Partition> {
        if resources.is_empty() {
            return None;
        }
        let has_endpoints = resources.iter().any(|r| Self::classify(r.kind()) == Partition::EndpointOnly);
        Some(if has_endpoints { Partition::EndpointOnly } else { Partition::Mixed })
    }

    fn apply(&self, partition: Partition, snapshot: Snapshot) -> Result<(), PipelineError> {
        let snapshot = Arc::new(snapshot);
        let mut nodes = self.store.tracked_identities(partition);
        if nodes.is_empty() {
            nodes.push(self.default_identity.clone());
        }
        let mut first_err = None;
        for node in &nodes {
            if let Err(e) = self.store.set_snapshot(partition, node, Arc::clone(&snapshot)) {
                warn!(partition = %partition, node = %node, error = %e, "could not set snapshot");
                first_err.get_or_insert(PipelineError::Store {
                    identity: node.clone(),
                    version: snapshot.version().to_string(),
                    message: e.to_string(),
                });
            }
        }
        debug!(partition = %partition, version = snapshot.version(), nodes = nodes.len(), "snapshot applied");
        first_err.map_or(Ok(()), Err)
    }
}

impl SnapshotSetter for SnapshotDistributor {
    fn set_routed(&self, version: &str, resources: Vec<Resource>, empty_route: Partition) -> Result<Partition, PipelineError> {
        let partition = Self::route(&resources).unwrap_or(empty_route);
        let snapshot = Snapshot::new(partition, version, resources)?;
        self.apply(partition, snapshot)?;
        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SnapshotCaches, StoreError};
    use kxds_core::xds::{ClusterLoadAssignment, Listener};
    use parking_lot::Mutex;

    /// Refuses writes for one node and records the rest.
    struct FlakyStore {
        nodes: Vec<String>,
        broken: String,
        written: Mutex<Vec<(Partition, String, String)>>,
    }

    impl SnapshotStore for FlakyStore {
        fn tracked_identities(&self, _partition: Partition) -> Vec<String> {
            self.nodes.clone()
        }

        fn set_snapshot(&self, partition: Partition, identity: &str, snapshot: Arc<Snapshot>) -> Result<(), StoreError> {
            if identity == self.broken {
                return Err(StoreError::EmptyIdentity);
            }
            self.written.lock().push((partition, identity.to_string(), snapshot.version().to_string()));
            Ok(())
        }
    }

    fn cla(name: &str) -> Resource {
        ClusterLoadAssignment { cluster_name: name.into(), endpoints: vec![] }.into()
    }

    #[test]
    fn route_is_kind_based() {
        assert_eq!(SnapshotDistributor::route(&[]), None);
        assert_eq!(SnapshotDistributor::route(&[cla("a")]), Some(Partition::EndpointOnly));
        let listener: Resource = Listener { name: "l".into(), api_listener: None }.into();
        assert_eq!(SnapshotDistributor::route(&[listener.clone()]), Some(Partition::Mixed));
        assert_eq!(SnapshotDistributor::route(&[listener, cla("a")]), Some(Partition::EndpointOnly));
    }

    #[test]
    fn failing_node_does_not_block_the_others() {
        let store = Arc::new(FlakyStore {
            nodes: vec!["a".into(), "b".into(), "c".into()],
            broken: "b".into(),
            written: Mutex::new(Vec::new()),
        });
        let dist = SnapshotDistributor::new(store.clone());
        let err = dist.set("7", vec![cla("x")]).unwrap_err();
        assert!(matches!(err, PipelineError::Store { ref identity, ref version, .. } if identity == "b" && version == "7"));
        let written = store.written.lock().clone();
        assert_eq!(
            written,
            vec![
                (Partition::EndpointOnly, "a".to_string(), "7".to_string()),
                (Partition::EndpointOnly, "c".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn custom_default_identity() {
        let caches = Arc::new(SnapshotCaches::new());
        let dist = SnapshotDistributor::new(caches.clone()).with_default_identity("mesh");
        dist.set("1", vec![cla("x")]).unwrap();
        assert!(caches.cache(Partition::EndpointOnly).snapshot("mesh").is_some());
        assert!(caches.cache(Partition::EndpointOnly).snapshot(DEFAULT_NODE_ID).is_none());
    }
}
