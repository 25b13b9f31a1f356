use kxds_core::{Partition, PipelineError, PipelineObserver};
use metrics::{counter, gauge};

/// Records pipeline events through the `metrics` facade; an exporter installed by the
/// binary decides where they go.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl PipelineObserver for MetricsObserver {
    fn on_publish(&self, source: &str, partition: Partition, _version: &str, resources: usize) {
        counter!("kxds_publish_total", 1u64, "source" => source.to_string(), "partition" => partition.label());
        gauge!("kxds_snapshot_resources", resources as f64, "partition" => partition.label());
    }

    fn on_skip(&self, source: &str, _version: &str) {
        counter!("kxds_publish_skipped_total", 1u64, "source" => source.to_string());
    }

    fn on_error(&self, source: &str, error: &PipelineError) {
        counter!("kxds_pipeline_errors_total", 1u64, "source" => source.to_string(), "kind" => error.kind());
    }
}
