//! beacon - media index daemon.
//!
//! Usage:
//!   beacon serve DIR...          Index directories and keep them current
//!   beacon serve --cdrom DEV     Also follow discs in a CD-ROM drive
//!   beacon query DIR             Crawl once and print the children as JSON
//!   beacon --help                Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use beacon_core::{BeaconConfig, MemoryDatabase, QueryFilter};
use beacon_server::{BeaconService, CdromDrive, ExtensionParser, ServerRequest, ServerResponse};

#[derive(Parser)]
#[command(
    name = "beacon",
    version,
    about = "Media index daemon",
    long_about = "beacon crawls media directories, keeps an index of their items \
                  current through kernel change notification and serves live queries."
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index directories and keep them current until interrupted
    Serve {
        /// Directories to index
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// CD-ROM drives to poll for discs
        #[arg(long)]
        cdrom: Vec<PathBuf>,
    },

    /// Crawl a directory once and print its children as JSON
    Query {
        /// Directory to crawl
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(BeaconConfig::default_path);
    let config = BeaconConfig::load(&config_path)
        .wrap_err_with(|| format!("Invalid configuration in {}", config_path.display()))?;

    match cli.command {
        Command::Serve { dirs, cdrom } => run_serve(config, &dirs, cdrom).await,
        Command::Query { dir } => run_query(config, &dir).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_service(config: BeaconConfig) -> Result<Arc<BeaconService>> {
    let db = MemoryDatabase::open(&config.database_dir)
        .wrap_err_with(|| format!("Cannot open index in {}", config.database_dir.display()))?;
    Ok(BeaconService::new(config, Arc::new(db), Arc::new(ExtensionParser::new())))
}

/// Index `dirs` until Ctrl-C.
async fn run_serve(config: BeaconConfig, dirs: &[PathBuf], cdrom: Vec<PathBuf>) -> Result<()> {
    let service = open_service(config)?;

    for dir in dirs {
        service
            .add_directory(dir)
            .await
            .wrap_err_with(|| format!("Cannot index {}", dir.display()))?;
    }
    for device in cdrom {
        service.spawn_device_poller(CdromDrive::new(device));
    }

    info!(media = service.media().len(), "serving, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.wrap_err("Cannot listen for Ctrl-C")?;

    service.shutdown().await;
    Ok(())
}

/// Crawl `dir` once and print its direct children.
async fn run_query(mut config: BeaconConfig, dir: &Path) -> Result<()> {
    config.watch = false;
    let service = open_service(config)?;

    let mountpoint = service
        .add_directory(dir)
        .await
        .wrap_err_with(|| format!("Cannot index {}", dir.display()))?;
    mountpoint.crawler().wait_cycle(0).await;

    let response = service
        .handle(ServerRequest::Query {
            filter: QueryFilter::new().parent_path(mountpoint.mountpoint()),
        })
        .await
        .wrap_err("Query failed")?;
    service.shutdown().await;

    let items = match response {
        ServerResponse::Items(items) => items,
        _ => Vec::new(),
    };
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
