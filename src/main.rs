use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cloudventory::config::{Config, Overrides, Settings};
use cloudventory::gcp::auth::{self, GcpCredentials};
use cloudventory::gcp::client::GcpClient;
use cloudventory::inventory::{ExecutionMode, Inventory};
use cloudventory::resource;
use cloudventory::store::{SnapshotWriter, SqlStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Inventory GCP resources into a SQL database
#[derive(Parser, Debug)]
#[command(name = "cloudventory", version = cloudventory::VERSION, about, long_about = None)]
struct Args {
    /// GCP project to inventory
    #[arg(short, long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// Database connection URL (postgres:// or sqlite:)
    #[arg(long, env = "DATABASE_URL")]
    db_url: Option<String>,

    /// Comma-separated regions or zones to scan (default: all)
    #[arg(long, env = "CLOUDVENTORY_REGIONS", value_delimiter = ',')]
    regions: Vec<String>,

    /// Resource types to inventory (default: all)
    #[arg(long, value_delimiter = ',')]
    resources: Vec<String>,

    /// How resource types are scheduled
    #[arg(long, value_enum, env = "CLOUDVENTORY_MODE")]
    mode: Option<ExecutionMode>,

    /// Maximum targets scanned at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per page fetch on transient errors
    #[arg(long, allow_negative_numbers = true)]
    max_retries: Option<i32>,

    /// Time budget for the whole run, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Also write `<resource>_inventory.json` snapshots into this directory
    #[arg(long, env = "CLOUDVENTORY_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Do not write to the database
    #[arg(long)]
    skip_db: bool,

    /// Use this access token instead of Application Default Credentials
    #[arg(long, env = "CLOUDSDK_AUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// List the available resource types and exit
    #[arg(long)]
    list_resources: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            project: self.project.clone(),
            database_url: self.db_url.clone(),
            regions: self.regions.clone(),
            resources: self.resources.clone(),
            mode: self.mode,
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
            snapshot_dir: self.snapshot_dir.clone(),
            skip_db: self.skip_db,
            access_token: self.access_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// RUST_LOG, when set, takes precedence over --log-level
fn setup_logging(level: LogLevel, log_file: Option<&Path>) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let (writer, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::debug!("cloudventory {} started with log level: {:?}", cloudventory::VERSION, level);

    Ok(guard)
}

fn list_resources() {
    for def in resource::get_registry() {
        println!("{:<20} {}", def.key, def.display_name);
    }
}

async fn run(args: Args) -> Result<bool> {
    if args.list_resources {
        list_resources();
        return Ok(true);
    }

    let settings = Settings::resolve(args.overrides(), &Config::load(), auth::get_default_project)?;
    let resources = resource::resolve_resources(&settings.resources)?;
    tracing::info!("Using project: {}", settings.project_id);

    let credentials = match &settings.access_token {
        Some(token) => GcpCredentials::from_token(token.clone()),
        None => GcpCredentials::new()
            .await
            .context("failed to load GCP credentials")?,
    };
    let client = GcpClient::new(&settings.project_id, credentials)?;

    let mut inventory = Inventory::new(Arc::new(client), resources, settings.options.clone())?;
    if let Some(url) = &settings.database_url {
        let store = SqlStore::connect(url)
            .await
            .context("failed to connect to the inventory database")?;
        inventory = inventory.with_sink(Arc::new(store));
    }
    if let Some(dir) = &settings.snapshot_dir {
        inventory = inventory.with_sink(Arc::new(SnapshotWriter::new(dir)));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight pages");
                cancel.cancel();
            }
        });
    }

    let report = inventory.run(settings.mode, &cancel).await;
    println!("{report}");

    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
