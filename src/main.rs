use std::fs::OpenOptions;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resync::{ActionId, ActionRecord, EngineConfig, ProcessorRegistry, StorageConfig, SyncEngine};

fn init_logging() {
    // RESYNC_LOG_FILE sends plain log lines to a file through env_logger;
    // otherwise log records are bridged into tracing and go to stderr.
    if let Ok(path) = std::env::var("RESYNC_LOG_FILE") {
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open log file {path}: {e}, logging to stderr"),
        }
        let _ = builder.try_init();
        return;
    }

    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[derive(Parser)]
#[command(name = "resync")]
#[command(about = "Inspect and maintain an offline action queue")]
struct Cli {
    /// JSON engine config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Sled data directory, overrides the config file
    #[arg(short, long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pending action queue
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },
    /// Summary of the persisted queue
    Status,
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum QueueCmd {
    /// List pending actions in FIFO order, one JSON object per line
    List,
    /// Remove one pending action
    Remove {
        #[arg(long)]
        id: u64,
    },
    /// Remove every pending action
    Clear {
        /// Required, the queued mutations are lost
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Serialize)]
struct RecordView<'a> {
    id: u64,
    kind: &'a str,
    enqueued_at: String,
    retry_count: u32,
    last_error: Option<&'a str>,
    payload: String,
}

impl<'a> From<&'a ActionRecord> for RecordView<'a> {
    fn from(record: &'a ActionRecord) -> Self {
        Self {
            id: record.id.0,
            kind: record.kind.as_str(),
            enqueued_at: record.enqueued_at.to_string(),
            retry_count: record.retry_count,
            last_error: record.last_error.as_deref(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
        }
    }
}

#[derive(Serialize)]
struct QueueSummary {
    data_dir: Option<String>,
    pending: usize,
    retrying: usize,
    oldest_id: Option<u64>,
    max_retries: u32,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(dir) = &cli.data_dir {
        config.storage = StorageConfig::Sled {
            data_dir: dir.clone(),
        };
    }
    // The CLI only inspects the queue, it never talks to a remote.
    config.start_online = false;
    Ok(config)
}

fn open_engine(config: EngineConfig) -> Result<SyncEngine> {
    SyncEngine::init(config, ProcessorRegistry::new()).context("opening action queue")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Status => {
            let data_dir = match &config.storage {
                StorageConfig::Sled { data_dir } => Some(data_dir.clone()),
                StorageConfig::Memory => None,
            };
            let max_retries = config.max_retries;
            let engine = open_engine(config)?;
            let snapshot = engine.snapshot();
            let summary = QueueSummary {
                data_dir,
                pending: snapshot.len(),
                retrying: snapshot.iter().filter(|r| r.retry_count > 0).count(),
                oldest_id: snapshot.first().map(|r| r.id.0),
                max_retries,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            engine.dispose().await?;
        }
        Command::Queue { cmd } => {
            let engine = open_engine(config)?;
            match cmd {
                QueueCmd::List => {
                    for record in engine.snapshot() {
                        println!("{}", serde_json::to_string(&RecordView::from(&record))?);
                    }
                }
                QueueCmd::Remove { id } => {
                    if engine.remove(ActionId(id))? {
                        info!("Removed action {id}");
                    } else {
                        anyhow::bail!("no pending action with id {id}");
                    }
                }
                QueueCmd::Clear { force } => {
                    if !force {
                        anyhow::bail!(
                            "refusing to drop {} pending actions without --force",
                            engine.size()
                        );
                    }
                    let dropped = engine.size();
                    engine.clear()?;
                    info!("Cleared {dropped} pending actions");
                }
            }
            engine.dispose().await?;
        }
    }

    Ok(())
}
