use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kxds_core::{Observers, Partition, PipelineObserver, Resource, SnapshotSetter, TracingObserver, DEFAULT_NODE_ID};
use kxds_kubehub::{EndpointsReflector, KubeListWatch, Reflect, ReflectorConfig, ServicesReflector};
use kxds_store::{MetricsObserver, SnapshotCaches, SnapshotDistributor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod manifest;

use manifest::Manifests;

#[derive(Parser, Debug)]
#[command(name = "kxds", version, about = "Kubernetes Services/Endpoints to xDS snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Services and Endpoints and keep the snapshot caches current
    Run {
        /// Namespace to watch (empty: all namespaces)
        #[arg(long = "namespace", env = "KXDS_NAMESPACE", default_value = "")]
        namespace: String,
        /// Full-state re-push interval
        #[arg(long = "resync-secs", env = "KXDS_RESYNC_SECS", default_value_t = 300)]
        resync_secs: u64,
        /// Upper bound for list/watch retry backoff
        #[arg(long = "backoff-max-secs", env = "KXDS_BACKOFF_MAX_SECS", default_value_t = 30)]
        backoff_max_secs: u64,
        /// Server-side watch timeout
        #[arg(long = "watch-timeout-secs", env = "KXDS_WATCH_TIMEOUT_SECS", default_value_t = kxds_kubehub::DEFAULT_WATCH_TIMEOUT_SECS)]
        watch_timeout_secs: u32,
        /// Node identity that receives snapshots while no client is connected
        #[arg(long = "default-node", env = "KXDS_DEFAULT_NODE", default_value = DEFAULT_NODE_ID)]
        default_node: String,
        /// Print the snapshot caches as JSON on shutdown
        #[arg(long = "dump-on-exit", action = ArgAction::SetTrue)]
        dump_on_exit: bool,
    },
    /// Translate a YAML/JSON manifest file without a cluster
    Translate {
        file: PathBuf,
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
        output: Output,
        /// Route the result through the distributor and print the cache dump
        #[arg(long = "snapshot", action = ArgAction::SetTrue)]
        snapshot: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("KXDS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KXDS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KXDS_METRICS_ADDR; expected host:port");
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM; only Ctrl-C stops kxds");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl-C received; shutting down"),
            _ = term.recv() => info!("SIGTERM received; shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received; shutting down");
    }
}

struct RunOpts {
    namespace: String,
    cfg: ReflectorConfig,
    watch_timeout_secs: u32,
    default_node: String,
    dump_on_exit: bool,
}

async fn run(opts: RunOpts) -> Result<()> {
    let client = kube::Client::try_default().await.context("building Kubernetes client")?;
    let caches = Arc::new(SnapshotCaches::new());
    let dist = Arc::new(SnapshotDistributor::new(caches.clone()).with_default_identity(opts.default_node.clone()));
    let observer: Arc<dyn PipelineObserver> =
        Arc::new(Observers::new().with(Arc::new(TracingObserver)).with(Arc::new(MetricsObserver)));

    let ns = Some(opts.namespace.as_str());
    let eps = KubeListWatch::<Endpoints>::new(client.clone(), ns).with_watch_timeout(opts.watch_timeout_secs);
    let svcs = KubeListWatch::<Service>::new(client, ns).with_watch_timeout(opts.watch_timeout_secs);
    let reflectors: Vec<Arc<dyn Reflect>> = vec![
        Arc::new(EndpointsReflector::new(eps, dist.clone(), observer.clone(), opts.cfg)),
        Arc::new(ServicesReflector::new(svcs, dist, observer, opts.cfg)),
    ];

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let scope = if opts.namespace.is_empty() { "*" } else { opts.namespace.as_str() };
    info!(
        namespace = scope,
        resync_secs = opts.cfg.resync_period.as_secs(),
        default_node = %opts.default_node,
        "kxds running"
    );
    let result = kxds_kubehub::start(cancel, reflectors).await;
    if opts.dump_on_exit {
        println!("{}", serde_json::to_string_pretty(&caches.describe())?);
    }
    if let Err(e) = &result {
        error!(error = %e, "reflectors stopped with an error");
    }
    result.context("reflector group failed")
}

fn translate(file: PathBuf, output: Output, snapshot: bool) -> Result<()> {
    let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let manifests = Manifests::parse(&text).with_context(|| format!("parsing {}", file.display()))?;
    if manifests.is_empty() {
        warn!(file = %file.display(), "no Services or Endpoints found");
    }
    let services = kxds_translate::services_to_resources(&manifests.services);
    let endpoints = kxds_translate::endpoints_to_resources(&manifests.endpoints);

    if snapshot {
        let caches = Arc::new(SnapshotCaches::new());
        let dist = SnapshotDistributor::new(caches.clone());
        dist.set_routed("offline", services, Partition::Mixed).context("building mixed snapshot")?;
        dist.set_routed("offline", endpoints, Partition::EndpointOnly).context("building endpoint snapshot")?;
        println!("{}", serde_json::to_string_pretty(&caches.describe())?);
        return Ok(());
    }

    let resources: Vec<Resource> = services.into_iter().chain(endpoints).collect();
    match output {
        Output::Human => {
            println!("{:<12} {:<8} NAME", "PARTITION", "KIND");
            for r in &resources {
                println!("{:<12} {:<8} {}", r.kind().partition().label(), r.kind().to_string(), r.name());
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { namespace, resync_secs, backoff_max_secs, watch_timeout_secs, default_node, dump_on_exit } => {
            let cfg = ReflectorConfig {
                resync_period: Duration::from_secs(resync_secs),
                backoff_max: Duration::from_secs(backoff_max_secs),
                ..Default::default()
            }
            .normalized();
            run(RunOpts { namespace, cfg, watch_timeout_secs, default_node, dump_on_exit }).await
        }
        Commands::Translate { file, output, snapshot } => translate(file, output, snapshot),
    }
}
