//! Meshroute Node - command line front end for the topology engine
//!
//! Opens the edge database, loads the graph, and runs one command:
//! - `ingest` records a file of observed paths as edge evidence
//! - `resolve` resolves a single path against the current graph
//! - `stats` prints graph and persistence statistics
//! - `compact` removes edges that have not been observed recently
//!
//! The flush task always gets a final flush before the process exits.

mod input;
mod report;

use anyhow::Context;
use clap::{Parser, Subcommand};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use meshroute_core::{EdgeStorage, HaversineGeography, PublicKey};
use meshroute_graph::{
    spawn_flush_task, EdgeStore, InMemoryContactRegistry, ObservedPath, PathResolver,
    SchedulerHandle,
};
use meshroute_state::SqliteEdgeStore;
use report::{CompactReport, IngestReport, PathReport, StatsReport};

#[derive(Parser)]
#[command(name = "meshroute-node")]
#[command(about = "Mesh topology inference and ambiguous path resolution")]
struct Args {
    /// Database path
    #[arg(long, default_value = "meshroute.db")]
    db: String,

    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// JSON file of known contacts
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a JSON file of observed paths
    Ingest {
        /// File holding `[{"path": "7e,a1", "origin": "...", "observed_at": "..."}]`
        file: PathBuf,
    },
    /// Resolve one path
    Resolve {
        /// Comma separated prefixes, e.g. 7e,a1,3c
        #[arg(long)]
        path: String,

        /// Full key of the originator
        #[arg(long)]
        origin: Option<String>,

        /// Also record the path as evidence
        #[arg(long)]
        record: bool,
    },
    /// Print graph statistics
    Stats,
    /// Remove edges not observed for the given number of days
    Compact {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
}

struct Node {
    storage: Arc<SqliteEdgeStore>,
    store: Arc<EdgeStore>,
    resolver: PathResolver,
    prefix_width: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for command output
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = input::read_config(args.config.as_deref()).await?;
    let policy = Arc::new(config.scoring_policy()?);

    let db_url = format!("sqlite:{}?mode=rwc", args.db);
    let storage = Arc::new(
        SqliteEdgeStore::new(&db_url)
            .await
            .with_context(|| format!("opening database {}", args.db))?,
    );
    info!("Database initialized: {}", args.db);

    let store = Arc::new(EdgeStore::new(storage.clone(), &config.persistence));
    store.load(config.persistence.startup_load_days).await?;

    let registry = match &args.contacts {
        Some(path) => input::read_contacts(path, config.prefix_width).await?,
        None => InMemoryContactRegistry::new(config.prefix_width),
    };
    info!(contacts = registry.len(), "Contacts loaded");

    let flusher = spawn_flush_task(store.clone());
    let node = Node {
        storage,
        store: store.clone(),
        resolver: PathResolver::new(
            store,
            Arc::new(registry),
            Arc::new(HaversineGeography),
            policy,
        ),
        prefix_width: config.prefix_width,
    };

    let output = run(args.command, &node, &flusher).await;

    let report = flusher.shutdown().await?;
    if !report.is_clean() {
        warn!(
            failed = report.failed,
            remaining = report.remaining,
            "Some edges could not be persisted"
        );
    }

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn run(
    command: Command,
    node: &Node,
    flusher: &SchedulerHandle,
) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Ingest { file } => {
            let paths = input::read_paths(&file, node.prefix_width).await?;
            info!(paths = paths.len(), file = %file.display(), "Ingesting paths");
            let resolved = node.resolver.resolve_batch(paths).await;
            let flush = flusher.flush().await?;
            Ok(serde_json::to_value(IngestReport::new(&resolved, flush))?)
        }
        Command::Resolve {
            path,
            origin,
            record,
        } => {
            let mut observed = ObservedPath::parse(&path, node.prefix_width)
                .with_context(|| format!("invalid path {:?}", path))?;
            if let Some(origin) = origin {
                observed = observed.with_origin(PublicKey::parse(&origin)?);
            }
            let resolved = if record {
                node.resolver.resolve(observed).await
            } else {
                node.resolver.resolve_only(&observed, Utc::now())
            };
            Ok(serde_json::to_value(PathReport::from(&resolved))?)
        }
        Command::Stats => {
            let report = StatsReport {
                graph: flusher.stats().await?,
                persisted_edges: node.storage.edge_count().await?,
            };
            Ok(serde_json::to_value(report)?)
        }
        Command::Compact { older_than_days } => {
            let removed = node.store.compact(older_than_days).await?;
            Ok(serde_json::to_value(CompactReport {
                older_than_days,
                removed,
            })?)
        }
    }
}
