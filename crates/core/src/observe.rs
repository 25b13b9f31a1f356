//! Pipeline observers: logging and metering hooks injected into the reflectors.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::kind::Partition;
use crate::PipelineError;

/// Callbacks fired by a reflector after each batch decision.
/// `source` names the reflector (e.g. "endpoints", "services").
pub trait PipelineObserver: Send + Sync {
    fn on_publish(&self, _source: &str, _partition: Partition, _version: &str, _resources: usize) {}
    fn on_skip(&self, _source: &str, _version: &str) {}
    fn on_error(&self, _source: &str, _error: &PipelineError) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Renders pipeline events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_publish(&self, source: &str, partition: Partition, version: &str, resources: usize) {
        info!(source, partition = %partition, version, resources, "snapshot published");
    }

    fn on_skip(&self, source: &str, version: &str) {
        debug!(source, version, "resources hash equal to the previous one; no update");
    }

    fn on_error(&self, source: &str, error: &PipelineError) {
        error!(source, kind = error.kind(), error = %error, "pipeline error");
    }
}

/// Fan-out to several observers in registration order.
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn PipelineObserver>>);

impl Observers {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.0.push(observer);
        self
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl PipelineObserver for Observers {
    fn on_publish(&self, source: &str, partition: Partition, version: &str, resources: usize) {
        for o in &self.0 {
            o.on_publish(source, partition, version, resources);
        }
    }

    fn on_skip(&self, source: &str, version: &str) {
        for o in &self.0 {
            o.on_skip(source, version);
        }
    }

    fn on_error(&self, source: &str, error: &PipelineError) {
        for o in &self.0 {
            o.on_error(source, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        publish: AtomicUsize,
        skip: AtomicUsize,
        error: AtomicUsize,
    }

    impl PipelineObserver for Counting {
        fn on_publish(&self, _: &str, _: Partition, _: &str, _: usize) { self.publish.fetch_add(1, Ordering::SeqCst); }
        fn on_skip(&self, _: &str, _: &str) { self.skip.fetch_add(1, Ordering::SeqCst); }
        fn on_error(&self, _: &str, _: &PipelineError) { self.error.fetch_add(1, Ordering::SeqCst); }
    }

    #[test]
    fn fan_out_reaches_every_observer() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let all = Observers::new().with(a.clone()).with(b.clone()).with(Arc::new(NoopObserver));
        assert_eq!(all.len(), 3);

        all.on_publish("services", Partition::Mixed, "1", 3);
        all.on_skip("services", "2");
        all.on_error("services", &PipelineError::Snapshot(crate::SnapshotError::EmptyVersion));

        for c in [&a, &b] {
            assert_eq!(c.publish.load(Ordering::SeqCst), 1);
            assert_eq!(c.skip.load(Ordering::SeqCst), 1);
            assert_eq!(c.error.load(Ordering::SeqCst), 1);
        }
    }
}
