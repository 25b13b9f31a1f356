#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kxds_core::{Partition, PipelineError, PipelineObserver};
use kxds_kubehub::{Change, ChangeStream, ListWatch, Listing, WatchError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub type EventTx<K> = mpsc::UnboundedSender<Result<Change<K>, WatchError>>;

struct Inner<K> {
    listings: Mutex<VecDeque<Result<Listing<K>, WatchError>>>,
    watches: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<Change<K>, WatchError>>>>,
    list_calls: AtomicUsize,
    watch_versions: Mutex<Vec<String>>,
}

/// Scripted list/watch source. Lists and watches are served in order; once a script
/// runs out the call never completes.
pub struct FakeSource<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for FakeSource<K> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K: Send + 'static> FakeSource<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listings: Mutex::new(VecDeque::new()),
                watches: Mutex::new(VecDeque::new()),
                list_calls: AtomicUsize::new(0),
                watch_versions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn push_listing(&self, version: &str, items: Vec<K>) -> &Self {
        self.inner.listings.lock().push_back(Ok(Listing { items, resource_version: version.to_string() }));
        self
    }

    pub fn push_list_error(&self, err: WatchError) -> &Self {
        self.inner.listings.lock().push_back(Err(err));
        self
    }

    /// Queue a watch and return the handle that feeds it. Dropping the handle ends the stream.
    pub fn push_watch(&self) -> EventTx<K> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.watches.lock().push_back(rx);
        tx
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn watch_versions(&self) -> Vec<String> {
        self.inner.watch_versions.lock().clone()
    }
}

#[async_trait::async_trait]
impl<K: Send + 'static> ListWatch<K> for FakeSource<K> {
    async fn list(&self) -> Result<Listing<K>, WatchError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.inner.listings.lock().pop_front();
        match next {
            Some(res) => res,
            None => futures::future::pending().await,
        }
    }

    async fn watch(&self, resource_version: &str) -> Result<ChangeStream<K>, WatchError> {
        self.inner.watch_versions.lock().push(resource_version.to_string());
        let next = self.inner.watches.lock().pop_front();
        match next {
            Some(rx) => Ok(futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()),
            None => futures::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Publish { source: String, partition: Partition, version: String, resources: usize },
    Skip { source: String, version: String },
    Error { source: String, kind: &'static str },
}

pub struct RecordingObserver(mpsc::UnboundedSender<Seen>);

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_publish(&self, source: &str, partition: Partition, version: &str, resources: usize) {
        let _ = self.0.send(Seen::Publish {
            source: source.to_string(),
            partition,
            version: version.to_string(),
            resources,
        });
    }

    fn on_skip(&self, source: &str, version: &str) {
        let _ = self.0.send(Seen::Skip { source: source.to_string(), version: version.to_string() });
    }

    fn on_error(&self, source: &str, error: &PipelineError) {
        let _ = self.0.send(Seen::Error { source: source.to_string(), kind: error.kind() });
    }
}

pub async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(WAIT, rx.recv()).await.expect("timed out waiting for pipeline event").expect("observer dropped")
}

pub fn publish(source: &str, partition: Partition, version: &str, resources: usize) -> Seen {
    Seen::Publish { source: source.into(), partition, version: version.into(), resources }
}

pub fn skip(source: &str, version: &str) -> Seen {
    Seen::Skip { source: source.into(), version: version.into() }
}

fn meta(name: &str, ns: &str, rv: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(ns.into()),
        resource_version: rv.map(str::to_string),
        ..Default::default()
    }
}

pub fn endpoints(name: &str, ns: &str, rv: Option<&str>, ips: &[&str], ports: &[(&str, i32)]) -> Endpoints {
    Endpoints {
        metadata: meta(name, ns, rv),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(ips.iter().map(|ip| EndpointAddress { ip: ip.to_string(), ..Default::default() }).collect()),
            ports: Some(
                ports
                    .iter()
                    .map(|(n, p)| EndpointPort { name: Some(n.to_string()), port: *p, ..Default::default() })
                    .collect(),
            ),
            ..Default::default()
        }]),
    }
}

pub fn service(name: &str, ns: &str, rv: Option<&str>, ports: &[(&str, i32)]) -> Service {
    Service {
        metadata: meta(name, ns, rv),
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(n, p)| ServicePort { name: Some(n.to_string()), port: *p, ..Default::default() })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}
