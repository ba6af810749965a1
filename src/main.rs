use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use queue_flood::cancel::CancelHandle;
use queue_flood::config::RunConfig;
use queue_flood::coordinator::RunCoordinator;
use queue_flood::gateway::config::{parse_connect_kv, parse_engine};
use queue_flood::gateway::{GatewayBuilder, QueueGateway};
use queue_flood::logging;
use queue_flood::metrics::stats::StatsSnapshot;
use queue_flood::naming::RunIdentity;
use queue_flood::output::{self, SnapshotWriter};
use queue_flood::provision::QueueProvisioner;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "queue-flood")]
#[command(about = "Provision queues and flood them with numbered items")]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Queue backend (redis, nats, mock)
    #[arg(long, default_value = "redis")]
    engine: String,

    /// Backend connection options as key=value (e.g. url=redis://host:6379)
    #[arg(long = "connect", value_name = "KEY=VALUE")]
    connect: Vec<String>,

    /// YAML run configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the queues and flood each one
    Run {
        #[command(flatten)]
        overrides: RunOverrides,

        /// Write the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write one CSV row per queue
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write periodic progress snapshots as CSV (stdout if "-")
        #[arg(long)]
        progress_csv: Option<String>,
    },
    /// Only ensure the queues of a run exist
    Provision {
        /// Run ID whose queues should exist
        #[arg(long, required = true)]
        run_id: String,

        /// Number of queues
        #[arg(long)]
        queue_count: Option<u32>,

        /// Queue name prefix
        #[arg(long)]
        queue_prefix: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
struct RunOverrides {
    /// Number of queues
    #[arg(long)]
    queue_count: Option<u32>,

    /// Items sent to each queue
    #[arg(long)]
    items_per_queue: Option<u64>,

    /// In-flight sends per queue
    #[arg(long, alias = "concurrency")]
    concurrency_limit: Option<usize>,

    /// Queue name prefix
    #[arg(long)]
    queue_prefix: Option<String>,

    /// Reuse an existing run ID (8 hex chars)
    #[arg(long)]
    run_id: Option<String>,

    /// Send rate cap per queue (msg/s)
    #[arg(long)]
    rate: Option<f64>,

    /// Message time-to-live in seconds (default: never expire)
    #[arg(long)]
    ttl_secs: Option<u64>,

    /// Progress snapshot interval in seconds (0 disables)
    #[arg(long)]
    snapshot_interval: Option<u64>,

    /// Fail the run when the share of failed sends exceeds this ratio
    #[arg(long)]
    max_failure_ratio: Option<f64>,
}

impl RunOverrides {
    fn apply(self, cfg: &mut RunConfig) {
        if let Some(v) = self.queue_count {
            cfg.queue_count = v;
        }
        if let Some(v) = self.items_per_queue {
            cfg.items_per_queue = v;
        }
        if let Some(v) = self.concurrency_limit {
            cfg.concurrency_limit = v;
        }
        if let Some(v) = self.queue_prefix {
            cfg.queue_prefix = v;
        }
        if self.run_id.is_some() {
            cfg.run_id = self.run_id;
        }
        if self.rate.is_some() {
            cfg.rate_per_queue = self.rate;
        }
        if self.ttl_secs.is_some() {
            cfg.message_ttl_secs = self.ttl_secs;
        }
        if let Some(v) = self.snapshot_interval {
            cfg.snapshot_interval_secs = v;
        }
        if self.max_failure_ratio.is_some() {
            cfg.max_failure_ratio = self.max_failure_ratio;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level)?;

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_yaml_file(path)?,
        None => RunConfig::default(),
    };

    let Some(engine) = parse_engine(&cli.engine) else {
        bail!("unknown engine {:?}", cli.engine);
    };
    let connect = parse_connect_kv(&cli.connect).context("--connect")?;
    let gateway = GatewayBuilder::connect(engine.clone(), connect)
        .await
        .context("gateway connect")?;
    gateway.health_check().await.context("gateway health check")?;
    info!(engine = ?engine, "connected");

    let outcome = match cli.command {
        Commands::Run {
            overrides,
            json,
            csv,
            progress_csv,
        } => {
            overrides.apply(&mut config);
            run(Arc::clone(&gateway), config, json, csv, progress_csv).await
        }
        Commands::Provision {
            run_id,
            queue_count,
            queue_prefix,
        } => {
            if let Some(v) = queue_count {
                config.queue_count = v;
            }
            if let Some(v) = queue_prefix {
                config.queue_prefix = v;
            }
            config.run_id = Some(run_id);
            provision_only(Arc::clone(&gateway), &config).await
        }
    };

    if let Err(e) = gateway.shutdown().await {
        warn!(error = %e, "gateway shutdown failed");
    }
    outcome
}

async fn run(
    gateway: Arc<dyn QueueGateway>,
    config: RunConfig,
    json: Option<PathBuf>,
    csv: Option<PathBuf>,
    progress_csv: Option<String>,
) -> Result<()> {
    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, letting in-flight sends finish");
                cancel.cancel();
            }
        });
    }

    let mut coordinator = RunCoordinator::new(gateway);
    let progress_writer = match progress_csv {
        Some(target) => {
            let mut writer = if target == "-" {
                SnapshotWriter::new_stdout()
            } else {
                SnapshotWriter::new_csv(&target).await?
            };
            let (tx, rx) = flume::unbounded::<StatsSnapshot>();
            coordinator = coordinator.with_snapshot_sink(tx);
            Some(tokio::spawn(async move {
                while let Ok(snap) = rx.recv_async().await {
                    if let Err(e) = writer.write_snapshot(&snap).await {
                        error!(error = %e, "failed to write progress snapshot");
                    }
                }
            }))
        }
        None => None,
    };

    let result = coordinator.run(&config, cancel.listener()).await;
    // Closing the sink ends the writer once buffered snapshots are flushed.
    drop(coordinator);
    if let Some(h) = progress_writer {
        let _ = h.await;
    }

    let report = result.context("run failed")?;
    println!("{report}");
    if let Some(path) = json {
        output::write_report_json(&report, path).await?;
    }
    if let Some(path) = csv {
        output::write_report_csv(&report, path).await?;
    }

    if let Some(budget) = config.max_failure_ratio {
        if !report.within_error_budget(budget) {
            bail!(
                "failure ratio {:.4} exceeds budget {:.4}",
                report.failure_ratio(),
                budget
            );
        }
    }
    Ok(())
}

async fn provision_only(gateway: Arc<dyn QueueGateway>, config: &RunConfig) -> Result<()> {
    config.validate()?;
    let run = match &config.run_id {
        Some(id) => RunIdentity::parse(id)?,
        None => bail!("provision requires a run id"),
    };
    let queues = QueueProvisioner::new(gateway, &config.queue_prefix)
        .provision(&run, config.queue_count)
        .await?;
    for q in queues.values() {
        println!("{:>4} {}", q.ordinal, q.name);
    }
    Ok(())
}
