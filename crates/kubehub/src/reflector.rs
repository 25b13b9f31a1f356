//! List+watch+resync loop for one resource class.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::runtime::watcher::DefaultBackoff;
use kube::ResourceExt;
use kxds_core::{ChangeDetector, Decision, Partition, PipelineError, PipelineObserver, Resource, SnapshotSetter};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::{Change, ListWatch, WatchError};

pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(5 * 60);
// kube's watcher backoff starts here and caps at DEFAULT_BACKOFF_MAX
const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(800);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ReflectorError {
    #[error("{reflector} reflector failed: {source}")]
    Watch {
        reflector: &'static str,
        #[source]
        source: WatchError,
    },
    #[error("reflector task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ReflectorConfig {
    pub resync_period: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            resync_period: DEFAULT_RESYNC_PERIOD,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl ReflectorConfig {
    /// Zero durations fall back to the defaults.
    pub fn normalized(mut self) -> Self {
        let d = Self::default();
        if self.resync_period.is_zero() {
            self.resync_period = d.resync_period;
        }
        if self.backoff_initial.is_zero() {
            self.backoff_initial = d.backoff_initial;
        }
        if self.backoff_max.is_zero() {
            self.backoff_max = d.backoff_max;
        }
        self.backoff_max = self.backoff_max.max(self.backoff_initial);
        self
    }

    /// Retry timing for list/watch failures: kube's watcher backoff, or the same
    /// jittered exponential strategy with the configured bounds when they were tuned.
    pub fn backoff(&self) -> Box<dyn Backoff + Send> {
        if self.backoff_initial == DEFAULT_BACKOFF_INITIAL && self.backoff_max == DEFAULT_BACKOFF_MAX {
            return Box::new(DefaultBackoff::default());
        }
        Box::new(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(self.backoff_initial)
                .with_max_interval(self.backoff_max)
                .with_multiplier(2.0)
                .with_randomization_factor(1.0)
                .with_max_elapsed_time(None)
                .build(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectorPhase {
    Idle,
    Listing,
    Watching,
    Stopped,
}

/// One kind of Kubernetes object and how it becomes xDS resources.
pub trait ResourceClass: Send + Sync + 'static {
    type Object: kube::Resource + Clone + Send + Sync + 'static;

    /// Reflector name used in logs, metrics and errors.
    const NAME: &'static str;

    /// Where this class's pushes land when the translation comes out empty.
    const PARTITION: Partition;

    fn translate<'a, I>(objects: I) -> Vec<Resource>
    where
        I: Iterator<Item = &'a Self::Object>;
}

pub struct EndpointsClass;

impl ResourceClass for EndpointsClass {
    type Object = Endpoints;
    const NAME: &'static str = "endpoints";
    const PARTITION: Partition = Partition::EndpointOnly;

    fn translate<'a, I>(objects: I) -> Vec<Resource>
    where
        I: Iterator<Item = &'a Endpoints>,
    {
        kxds_translate::endpoints_to_resources(objects)
    }
}

pub struct ServicesClass;

impl ResourceClass for ServicesClass {
    type Object = Service;
    const NAME: &'static str = "services";
    const PARTITION: Partition = Partition::Mixed;

    fn translate<'a, I>(objects: I) -> Vec<Resource>
    where
        I: Iterator<Item = &'a Service>,
    {
        kxds_translate::services_to_resources(objects)
    }
}

// namespace/name, or name for cluster-scoped objects
fn object_key<K: kube::Resource>(o: &K) -> String {
    match o.namespace() {
        Some(ns) => format!("{}/{}", ns, o.name_any()),
        None => o.name_any(),
    }
}

/// Returns true when cancelled before the delay elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Mirrors one resource class and publishes its translation whenever it changes.
pub struct Reflector<C: ResourceClass, W> {
    source: W,
    setter: Arc<dyn SnapshotSetter>,
    observer: Arc<dyn PipelineObserver>,
    detector: ChangeDetector,
    cfg: ReflectorConfig,
    phase_tx: watch::Sender<ReflectorPhase>,
    _class: PhantomData<fn() -> C>,
}

impl<C, W> Reflector<C, W>
where
    C: ResourceClass,
    W: ListWatch<C::Object>,
{
    pub fn new(source: W, setter: Arc<dyn SnapshotSetter>, observer: Arc<dyn PipelineObserver>, cfg: ReflectorConfig) -> Self {
        let (phase_tx, _) = watch::channel(ReflectorPhase::Idle);
        Self {
            source,
            setter,
            observer,
            detector: ChangeDetector::new(),
            cfg: cfg.normalized(),
            phase_tx,
            _class: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str { C::NAME }

    pub fn phase(&self) -> ReflectorPhase { *self.phase_tx.borrow() }

    pub fn subscribe_phase(&self) -> watch::Receiver<ReflectorPhase> { self.phase_tx.subscribe() }

    pub fn detector(&self) -> &ChangeDetector { &self.detector }

    fn set_phase(&self, phase: ReflectorPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Batch handler: translate the full current object set, skip it when nothing
    /// changed since the last publish, publish it as `version` otherwise.
    pub fn push<'a, I>(&self, version: &str, objects: I)
    where
        I: IntoIterator<Item = &'a C::Object>,
    {
        let mut resources = C::translate(objects.into_iter());
        match self.detector.decide(&mut resources) {
            Decision::Skip(_) => {
                self.observer.on_skip(C::NAME, version);
                return;
            }
            Decision::PublishUnhashed(e) => self.observer.on_error(C::NAME, &PipelineError::Hash(e)),
            Decision::Publish(_) => {}
        }
        let count = resources.len();
        match self.setter.set_routed(version, resources, C::PARTITION) {
            Ok(partition) => self.observer.on_publish(C::NAME, partition, version, count),
            Err(e) => {
                // Nothing was applied; make the next batch publish again.
                self.detector.invalidate();
                self.observer.on_error(C::NAME, &e);
            }
        }
    }

    /// Run until cancelled (`Ok`) or a fatal list/watch error (`Err`).
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ReflectorError> {
        info!(reflector = C::NAME, "starting reflector");
        let result = self.run_loop(&cancel).await;
        self.set_phase(ReflectorPhase::Stopped);
        match &result {
            Ok(()) => warn!(reflector = C::NAME, "reflector has been stopped"),
            Err(e) => error!(reflector = C::NAME, error = %e, "reflector failed"),
        }
        result
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<(), ReflectorError> {
        let fatal = |source: WatchError| ReflectorError::Watch { reflector: C::NAME, source };
        let mut backoff = self.cfg.backoff();
        let cap = self.cfg.backoff_max;
        let period = self.cfg.resync_period;

        'relist: loop {
            self.set_phase(ReflectorPhase::Listing);
            let listed = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.source.list() => res,
            };
            let listing = match listed {
                Ok(l) => l,
                Err(e) if e.is_fatal() => return Err(fatal(e)),
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(cap);
                    warn!(reflector = C::NAME, error = %e, delay_ms = delay.as_millis() as u64, "list failed; retrying");
                    if sleep_or_cancel(cancel, delay).await {
                        return Ok(());
                    }
                    continue 'relist;
                }
            };
            backoff.reset();
            let mut version = listing.resource_version;
            let mut objects: BTreeMap<String, C::Object> =
                listing.items.into_iter().map(|o| (object_key(&o), o)).collect();
            debug!(reflector = C::NAME, count = objects.len(), version = %version, "listed");
            self.push(&version, objects.values());

            self.set_phase(ReflectorPhase::Watching);
            let mut resync = tokio::time::interval_at(Instant::now() + period, period);
            resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let opened = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    res = self.source.watch(&version) => res,
                };
                let mut stream = match opened {
                    Ok(s) => s,
                    Err(e) if e.is_fatal() => return Err(fatal(e)),
                    Err(e) => {
                        let delay = backoff.next_backoff().unwrap_or(cap);
                        warn!(reflector = C::NAME, error = %e, delay_ms = delay.as_millis() as u64, "watch failed; retrying");
                        if sleep_or_cancel(cancel, delay).await {
                            return Ok(());
                        }
                        continue;
                    }
                };

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = resync.tick() => {
                            debug!(reflector = C::NAME, version = %version, "resync");
                            self.push(&version, objects.values());
                        }
                        next = stream.next() => match next {
                            Some(Ok(Change::Upsert(o))) => {
                                backoff.reset();
                                if let Some(rv) = o.resource_version() {
                                    version = rv;
                                }
                                objects.insert(object_key(&o), o);
                                self.push(&version, objects.values());
                            }
                            Some(Ok(Change::Delete(o))) => {
                                backoff.reset();
                                if let Some(rv) = o.resource_version() {
                                    version = rv;
                                }
                                objects.remove(&object_key(&o));
                                self.push(&version, objects.values());
                            }
                            Some(Ok(Change::Bookmark(rv))) => version = rv,
                            Some(Ok(Change::Expired)) => {
                                info!(reflector = C::NAME, version = %version, "watch expired; relisting");
                                continue 'relist;
                            }
                            Some(Err(e)) if e.is_fatal() => return Err(fatal(e)),
                            Some(Err(e)) => {
                                let delay = backoff.next_backoff().unwrap_or(cap);
                                warn!(reflector = C::NAME, error = %e, delay_ms = delay.as_millis() as u64, "watch stream error; rewatching");
                                if sleep_or_cancel(cancel, delay).await {
                                    return Ok(());
                                }
                                break;
                            }
                            None => {
                                debug!(reflector = C::NAME, version = %version, "watch stream ended; rewatching");
                                break;
                            }
                        },
                    }
                }
            }
        }
    }
}
