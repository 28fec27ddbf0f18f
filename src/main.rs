use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use notion_stix::config::{self, Config, ImportMode, StoreBackend};
use notion_stix::cookies::CookieCodec;
use notion_stix::import::{ImportSettings, Importer};
use notion_stix::jobs::{ExecutionMode, ImportJobs};
use notion_stix::kv::{self, KvStore, MemoryKv, SqliteKv};
use notion_stix::mitre::Mitre;
use notion_stix::notion::{HttpConnector, NotionConnector, RetryingClient};
use notion_stix::oauth::NotionOAuth;
use notion_stix::outbox::{self, TaskQueue, WorkerContext};
use notion_stix::server::{self, AppState};
use notion_stix::stix::Collection;
use notion_stix::updates::UpdateHub;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the OAuth callback, import trigger and progress stream
    Serve {
        /// In queued mode, leave the queue to a separate `worker` process
        #[arg(long)]
        no_worker: bool,
    },
    /// Consume queued import tasks only
    Worker,
}

/// Everything the server and the worker share.
struct Runtime {
    cfg: Arc<Config>,
    store: Arc<dyn KvStore>,
    queue: Option<TaskQueue>,
    connector: Arc<dyn NotionConnector>,
    importer: Arc<Importer>,
    updates: UpdateHub,
}

impl Runtime {
    async fn build(cfg: Config) -> Result<Self> {
        cfg.ensure_dirs()?;
        let (store, queue): (Arc<dyn KvStore>, Option<TaskQueue>) = match cfg.store.backend {
            StoreBackend::Memory => {
                info!("using in-memory store; connections and markers are lost on restart");
                (Arc::new(MemoryKv::new()), None)
            }
            StoreBackend::Sqlite => {
                let sqlite = SqliteKv::open(&cfg.store.database_url())
                    .await
                    .context("failed to open store")?;
                let queue = TaskQueue::new(sqlite.pool().clone());
                (Arc::new(sqlite), Some(queue))
            }
        };
        tokio::spawn(kv::cleanup(store.clone(), cfg.store.compaction_interval()));

        let collection = Arc::new(Collection::load(&cfg.stix.bundle_path).await?);
        let updates = UpdateHub::new();
        let importer = Arc::new(Importer::new(
            store.clone(),
            Mitre::new(collection),
            updates.clone(),
            ImportSettings::from(&cfg.import),
        ));
        let connector: Arc<dyn NotionConnector> =
            Arc::new(HttpConnector::from_config(&cfg.notion, &cfg.http)?);

        Ok(Self {
            cfg: Arc::new(cfg),
            store,
            queue,
            connector,
            importer,
            updates,
        })
    }

    fn queue(&self) -> Result<TaskQueue> {
        self.queue
            .clone()
            .context("queued import mode requires the sqlite store backend")
    }

    async fn run_worker(&self) -> Result<()> {
        let queue = self.queue()?;
        let recovered = queue.requeue_running().await?;
        if recovered > 0 {
            info!(recovered, "returned interrupted tasks to the queue");
        }
        let ctx = WorkerContext {
            importer: self.importer.clone(),
            connector: self.connector.clone(),
        };
        outbox::run_worker(
            queue,
            ctx,
            self.cfg.import.worker_concurrency,
            Duration::from_millis(self.cfg.import.worker_poll_interval_ms),
        )
        .await
    }
}

async fn serve(rt: Runtime, no_worker: bool) -> Result<()> {
    let rt = Arc::new(rt);
    let mode = match rt.cfg.import.mode {
        ImportMode::Inline => ExecutionMode::Inline,
        ImportMode::Queued => {
            if !no_worker {
                let worker_rt = rt.clone();
                tokio::spawn(async move {
                    if let Err(err) = worker_rt.run_worker().await {
                        error!(?err, "embedded import worker stopped");
                    }
                });
            }
            ExecutionMode::Queued(rt.queue()?)
        }
    };

    let http = RetryingClient::from_config(&rt.cfg.http)?;
    let oauth = NotionOAuth::new(http.inner().clone(), &rt.cfg.notion)?;
    let state = AppState {
        config: rt.cfg.clone(),
        store: rt.store.clone(),
        connector: rt.connector.clone(),
        oauth: Arc::new(oauth),
        cookies: CookieCodec::from_config(&rt.cfg.cookies),
        updates: rt.updates.clone(),
        jobs: ImportJobs::new(rt.importer.clone(), mode),
    };
    server::serve(state).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let rt = Runtime::build(cfg).await?;

    match args.command.unwrap_or(Command::Serve { no_worker: false }) {
        Command::Serve { no_worker } => serve(rt, no_worker).await,
        Command::Worker => rt.run_worker().await,
    }
}
