//! kxds store: in-RAM snapshot caches (one per partition) and the distributor that
//! publishes translated resources into them.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use kxds_core::{Partition, Resource, Snapshot, DEFAULT_NODE_ID};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

mod distributor;
mod observer;

pub use distributor::SnapshotDistributor;
pub use observer::MetricsObserver;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("node identity must not be empty")]
    EmptyIdentity,
}

/// Contract the distributor needs from a snapshot store. Implementations must accept
/// concurrent calls for different partitions.
pub trait SnapshotStore: Send + Sync {
    fn tracked_identities(&self, partition: Partition) -> Vec<String>;
    fn set_snapshot(&self, partition: Partition, identity: &str, snapshot: Arc<Snapshot>) -> Result<(), StoreError>;
}

/// Snapshots of one partition keyed by node identity.
pub struct SnapshotCache {
    partition: Partition,
    snapshots: RwLock<FxHashMap<String, Arc<Snapshot>>>,
    tracked: RwLock<BTreeSet<String>>,
    latest: ArcSwapOption<Snapshot>,
    version_tx: watch::Sender<String>,
    writes: AtomicU64,
}

impl SnapshotCache {
    pub fn new(partition: Partition) -> Self {
        let (version_tx, _) = watch::channel(String::new());
        Self {
            partition,
            snapshots: RwLock::new(FxHashMap::default()),
            tracked: RwLock::new(BTreeSet::new()),
            latest: ArcSwapOption::empty(),
            version_tx,
            writes: AtomicU64::new(0),
        }
    }

    pub fn partition(&self) -> Partition { self.partition }

    /// Start tracking a node (called by the transport when a client first asks).
    /// A new node is seeded with the latest snapshot of the partition.
    pub fn track(&self, identity: &str) -> Option<Arc<Snapshot>> {
        let added = self.tracked.write().insert(identity.to_string());
        if added {
            info!(partition = %self.partition, node = identity, "tracking node");
        }
        let mut snaps = self.snapshots.write();
        if !snaps.contains_key(identity) {
            if let Some(latest) = self.latest.load_full() {
                snaps.insert(identity.to_string(), latest);
            }
        }
        snaps.get(identity).cloned()
    }

    /// Evict a node and its snapshot.
    pub fn forget(&self, identity: &str) -> bool {
        let was_tracked = self.tracked.write().remove(identity);
        let had_snapshot = self.snapshots.write().remove(identity).is_some();
        if was_tracked {
            info!(partition = %self.partition, node = identity, "node evicted");
        }
        was_tracked || had_snapshot
    }

    /// Tracked identities in sorted order.
    pub fn tracked(&self) -> Vec<String> {
        self.tracked.read().iter().cloned().collect()
    }

    pub fn snapshot(&self, identity: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.read().get(identity).cloned()
    }

    /// Most recently written snapshot regardless of node.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.load_full()
    }

    /// Receives the version of every newly written snapshot.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.version_tx.subscribe()
    }

    /// Number of `set_snapshot` calls applied so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn set_snapshot(&self, identity: &str, snapshot: Arc<Snapshot>) -> Result<(), StoreError> {
        if identity.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }
        let version = snapshot.version().to_string();
        self.snapshots.write().insert(identity.to_string(), Arc::clone(&snapshot));
        self.latest.store(Some(snapshot));
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.version_tx.send_if_modified(|current| {
            if *current == version {
                return false;
            }
            *current = version.clone();
            true
        });
        debug!(partition = %self.partition, node = identity, version = %version, "snapshot set");
        Ok(())
    }

    // Nodes to render: tracked ones, or the default node while nobody connected.
    fn describe(&self) -> serde_json::Value {
        let mut nodes = self.tracked();
        if nodes.is_empty() {
            nodes.push(DEFAULT_NODE_ID.to_string());
        }
        let mut out = serde_json::Map::new();
        for node in nodes {
            let Some(snap) = self.snapshot(&node) else { continue };
            let mut by_type = serde_json::Map::new();
            for kind in snap.kinds() {
                let resources: BTreeMap<&str, serde_json::Value> = snap
                    .resources(kind)
                    .into_iter()
                    .flatten()
                    .map(|(name, r)| (name.as_str(), encode_for_dump(self.partition, &node, r)))
                    .collect();
                by_type.insert(
                    kind.type_url().to_string(),
                    serde_json::json!({ "version": snap.version(), "resources": resources }),
                );
            }
            out.insert(node, serde_json::Value::Object(by_type));
        }
        serde_json::Value::Object(out)
    }
}

// Unencodable resources show up as null in the dump.
fn encode_for_dump(partition: Partition, node: &str, resource: &Resource) -> serde_json::Value {
    serde_json::to_value(resource).unwrap_or_else(|e| {
        warn!(partition = %partition, node, resource = resource.name(), error = %e, "cannot encode resource for dump");
        serde_json::Value::Null
    })
}

/// Both partition caches behind one handle, shared by the distributor, the transport
/// and the admin surface.
pub struct SnapshotCaches {
    mixed: SnapshotCache,
    endpoints: SnapshotCache,
}

impl Default for SnapshotCaches {
    fn default() -> Self { Self::new() }
}

impl SnapshotCaches {
    pub fn new() -> Self {
        Self { mixed: SnapshotCache::new(Partition::Mixed), endpoints: SnapshotCache::new(Partition::EndpointOnly) }
    }

    pub fn cache(&self, partition: Partition) -> &SnapshotCache {
        match partition {
            Partition::Mixed => &self.mixed,
            Partition::EndpointOnly => &self.endpoints,
        }
    }

    /// Read-only JSON dump: partition label -> node -> type URL -> {version, resources}.
    pub fn describe(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for p in Partition::ALL {
            out.insert(p.label().to_string(), self.cache(p).describe());
        }
        serde_json::Value::Object(out)
    }
}

impl SnapshotStore for SnapshotCaches {
    fn tracked_identities(&self, partition: Partition) -> Vec<String> {
        self.cache(partition).tracked()
    }

    fn set_snapshot(&self, partition: Partition, identity: &str, snapshot: Arc<Snapshot>) -> Result<(), StoreError> {
        self.cache(partition).set_snapshot(identity, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kxds_core::xds::{Cluster, ClusterLoadAssignment};
    use kxds_core::ResourceKind;

    fn eds(version: &str) -> Arc<Snapshot> {
        Arc::new(
            Snapshot::new(
                Partition::EndpointOnly,
                version,
                vec![ClusterLoadAssignment { cluster_name: "foo.default:80".into(), endpoints: vec![] }.into()],
            )
            .unwrap(),
        )
    }

    #[test]
    fn track_seeds_new_node_with_latest() {
        let cache = SnapshotCache::new(Partition::EndpointOnly);
        assert!(cache.track("a").is_none());
        cache.set_snapshot("a", eds("1")).unwrap();
        let seeded = cache.track("b").expect("seeded");
        assert_eq!(seeded.version(), "1");
        assert_eq!(cache.tracked(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn forget_drops_node_and_snapshot() {
        let cache = SnapshotCache::new(Partition::EndpointOnly);
        cache.track("a");
        cache.set_snapshot("a", eds("1")).unwrap();
        assert!(cache.forget("a"));
        assert!(cache.snapshot("a").is_none());
        assert!(cache.tracked().is_empty());
        assert!(!cache.forget("a"));
    }

    #[test]
    fn empty_identity_is_rejected() {
        let cache = SnapshotCache::new(Partition::EndpointOnly);
        assert_eq!(cache.set_snapshot("", eds("1")), Err(StoreError::EmptyIdentity));
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_new_versions_once() {
        let cache = SnapshotCache::new(Partition::EndpointOnly);
        let mut rx = cache.subscribe();
        cache.set_snapshot("a", eds("5")).unwrap();
        cache.set_snapshot("b", eds("5")).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), "5");
        assert!(!rx.has_changed().unwrap(), "same version on a second node must not notify again");
        assert_eq!(cache.writes(), 2);
    }

    #[test]
    fn describe_falls_back_to_default_node() {
        let caches = SnapshotCaches::new();
        caches.set_snapshot(Partition::EndpointOnly, DEFAULT_NODE_ID, eds("9")).unwrap();
        let mixed = Snapshot::new(
            Partition::Mixed,
            "3",
            vec![Cluster { name: "foo.default:http".into(), ..Default::default() }.into()],
        )
        .unwrap();
        caches.cache(Partition::Mixed).track("envoy-1");
        caches.set_snapshot(Partition::Mixed, "envoy-1", Arc::new(mixed)).unwrap();

        let dump = caches.describe();
        let eds_url = ResourceKind::Endpoint.type_url();
        assert_eq!(dump["EDS"]["default"][eds_url]["version"], "9");
        assert!(dump["EDS"]["default"][eds_url]["resources"]["foo.default:80"].is_object());
        let cds_url = ResourceKind::Cluster.type_url();
        assert_eq!(dump["LDS/RDS/CDS"]["envoy-1"][cds_url]["resources"]["foo.default:http"]["@type"], cds_url);
        assert!(dump["LDS/RDS/CDS"].get("default").is_none());
    }

    #[test]
    fn dump_encoding_matches_serde() {
        let r: Resource = ClusterLoadAssignment { cluster_name: "foo.default:80".into(), endpoints: vec![] }.into();
        let v = encode_for_dump(Partition::EndpointOnly, DEFAULT_NODE_ID, &r);
        assert_eq!(v, serde_json::to_value(&r).unwrap());
        assert_eq!(v["clusterName"], "foo.default:80");
    }
}
