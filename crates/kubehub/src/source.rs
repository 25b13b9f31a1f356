//! List+watch sources the reflectors pull from.

use std::fmt::Debug;

use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::Client;
use serde::de::DeserializeOwned;

/// Server-side watch timeout; the API server rejects anything at or above 295s.
pub const DEFAULT_WATCH_TIMEOUT_SECS: u32 = 290;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("transient watch failure: {0}")]
    Transient(String),
    #[error("fatal watch failure: {0}")]
    Fatal(String),
}

impl WatchError {
    /// Errors retrying cannot fix: credentials, RBAC, or a resource the server does
    /// not serve.
    pub fn is_fatal(&self) -> bool {
        match self {
            WatchError::Kube(kube::Error::Api(resp)) => matches!(resp.code, 401 | 403 | 404),
            WatchError::Kube(_) | WatchError::Transient(_) => false,
            WatchError::Fatal(_) => true,
        }
    }
}

/// Full listing plus the collection version it was read at.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

#[derive(Debug, Clone)]
pub enum Change<K> {
    Upsert(K),
    Delete(K),
    /// Progress marker carrying a newer collection version.
    Bookmark(String),
    /// The watched version is gone from the server's history; relist.
    Expired,
}

pub type ChangeStream<K> = BoxStream<'static, Result<Change<K>, WatchError>>;

#[async_trait::async_trait]
pub trait ListWatch<K: Send + 'static>: Send + Sync {
    async fn list(&self) -> Result<Listing<K>, WatchError>;
    async fn watch(&self, resource_version: &str) -> Result<ChangeStream<K>, WatchError>;
}

/// `ListWatch` over the Kubernetes API, cluster-wide or for one namespace.
pub struct KubeListWatch<K> {
    api: Api<K>,
    watch_timeout_secs: u32,
}

impl<K> KubeListWatch<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    /// An empty or missing namespace watches every namespace.
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let api = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self { api, watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS }
    }

    pub fn with_watch_timeout(mut self, secs: u32) -> Self {
        self.watch_timeout_secs = secs.clamp(1, DEFAULT_WATCH_TIMEOUT_SECS);
        self
    }
}

fn to_change<K>(event: kube::Result<WatchEvent<K>>) -> Result<Change<K>, WatchError> {
    match event? {
        WatchEvent::Added(o) | WatchEvent::Modified(o) => Ok(Change::Upsert(o)),
        WatchEvent::Deleted(o) => Ok(Change::Delete(o)),
        WatchEvent::Bookmark(b) => Ok(Change::Bookmark(b.metadata.resource_version)),
        WatchEvent::Error(e) if e.code == 410 => Ok(Change::Expired),
        WatchEvent::Error(e) => Err(WatchError::Kube(kube::Error::Api(e))),
    }
}

#[async_trait::async_trait]
impl<K> ListWatch<K> for KubeListWatch<K>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self) -> Result<Listing<K>, WatchError> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(Listing { resource_version: list.metadata.resource_version.unwrap_or_default(), items: list.items })
    }

    async fn watch(&self, resource_version: &str) -> Result<ChangeStream<K>, WatchError> {
        let params = WatchParams::default().timeout(self.watch_timeout_secs);
        let stream = self.api.watch(&params, resource_version).await?;
        Ok(stream.map(to_change).boxed())
    }
}
