//! paramgridd — ParamGrid driver.
//!
//! Boots a coordinator together with in-process parameter servers and
//! workers, then drives one training session through it:
//! - Parameter-server registration and readiness
//! - Worker discovery
//! - Cluster-wide model load and save
//! - Ordered shutdown
//!
//! # Usage
//!
//! ```text
//! paramgridd simulate --ps-count 4 --workers 8 --model-path /tmp/model
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use paramgrid_coordinator::local::{LocalParameterServer, LocalWorker};
use paramgrid_coordinator::{CoordinatorConfig, CoordinatorService, ModelDescriptor};

#[derive(Parser)]
#[command(name = "paramgridd", about = "ParamGrid coordinator driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full session against in-process parameter servers and workers.
    Simulate {
        /// Number of parameter servers the model is partitioned across.
        #[arg(long, default_value = "3")]
        ps_count: usize,

        /// Number of workers to register.
        #[arg(long, default_value = "2")]
        workers: usize,

        /// Model path handed to every parameter server for load and save.
        #[arg(long, default_value = "/tmp/paramgrid/model")]
        model_path: String,

        /// coordinator.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Give up waiting for parameter-server readiness after this many seconds.
        #[arg(long, default_value = "30")]
        ready_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,paramgrid=debug,paramgridd=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            ps_count,
            workers,
            model_path,
            config,
            ready_timeout,
        } => {
            let config = match config {
                Some(path) => CoordinatorConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => CoordinatorConfig::default(),
            };
            run_simulation(
                ps_count,
                workers,
                &model_path,
                config,
                Duration::from_secs(ready_timeout),
            )
            .await
        }
    }
}

async fn run_simulation(
    ps_count: usize,
    workers: usize,
    model_path: &str,
    config: CoordinatorConfig,
    ready_timeout: Duration,
) -> anyhow::Result<()> {
    info!(ps_count, workers, "ParamGrid session starting");

    let model = ModelDescriptor::new(ps_count)?;
    let (service, client) = CoordinatorService::new(model.clone(), &config)?;
    let coordinator = service.spawn();

    // ── Parameter servers ──────────────────────────────────────

    let mut servers = Vec::with_capacity(ps_count);
    for index in 0..ps_count {
        let address = format!("127.0.0.1:{}", 7000 + index);
        let server = LocalParameterServer::new(index, address)
            .spawn(client.clone(), config.outbound_capacity)
            .await?;
        servers.push(server);
    }

    tokio::time::timeout(ready_timeout, model.wait_ps_ready())
        .await
        .context("parameter servers did not all register in time")?;
    info!("parameter servers ready");

    // ── Workers ────────────────────────────────────────────────

    for w in 0..workers {
        let worker = LocalWorker::register(format!("worker-{w}"), &client).await?;
        let addresses: Vec<String> = worker
            .roster
            .addresses()
            .into_iter()
            .map(|a| a.unwrap_or_else(|| "<unregistered>".to_string()))
            .collect();
        info!(worker = %worker.handle.id(), ?addresses, "worker roster");
    }

    // ── Load, then save ────────────────────────────────────────

    let load = client.load_model(model_path).await?;
    info!(report = %serde_json::to_string(&load)?, "load finished");

    let save = client.save_model(model_path).await?;
    info!(report = %serde_json::to_string(&save)?, "save finished");

    // ── Shutdown ───────────────────────────────────────────────

    let report = client.training_done().await?;
    if report.timed_out {
        warn!(unacknowledged = ?report.unacknowledged, "some parameter servers did not confirm stop");
    }
    info!(report = %serde_json::to_string(&report)?, "shutdown finished");

    coordinator.await?;
    for server in servers {
        let log = server.await?;
        info!(setups = log.setups.len(), stops = log.stops, "parameter server exited");
    }

    info!("ParamGrid session finished");
    Ok(())
}
