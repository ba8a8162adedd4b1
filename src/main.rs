use anyhow::{Context, Result, bail};
use cfex_ingest::config::AppConfig;
use cfex_ingest::context::AppContext;
use cfex_ingest::core::{BatchOptions, BatchRequest, ChannelObserver, TransferDestinations};
use cfex_ingest::logging::{self, LogConfig};
use cfex_ingest::rpc::{RpcClient, RpcServer};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "cfex-ingest")]
#[command(about = "Ingest photos and video from CFexpress cards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $CFEX_INGEST_CONFIG, then ./cfex-ingest.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON-RPC host interface
    Daemon(ServerArgs),
    /// Run one batch in the foreground
    Transfer(TransferArgs),
    /// Show the state of the daemon's most recent batch
    Status,
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rpc_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    card_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verify_checksums: Option<bool>,
}

#[derive(Args)]
struct TransferArgs {
    /// Card mount point to ingest from
    #[arg(long)]
    source: PathBuf,

    #[arg(long)]
    photos: Option<PathBuf>,

    #[arg(long)]
    raw_videos: Option<PathBuf>,

    #[arg(long)]
    skip_validation: bool,

    /// Print every transfer event as a JSON line
    #[arg(long)]
    events: bool,

    /// Hand the batch to a running daemon instead of running it here
    #[arg(long)]
    remote: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let config = match &cli.command {
        Commands::Daemon(args) => AppConfig::new(Some(args), config_path)?,
        _ => AppConfig::new(None::<&ServerArgs>, config_path)?,
    };

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Daemon(_) => run_daemon(AppContext::new(config))
            .await
            .context("Failed to run daemon")?,
        Commands::Transfer(args) => run_transfer(config, args)
            .await
            .context("Transfer failed")?,
        Commands::Status => run_status(&config)
            .await
            .context("Failed to check status of daemon")?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn run_daemon(ctx: AppContext) -> Result<()> {
    let server = Arc::new(RpcServer::bind(ctx.clone(), ctx.config.rpc_bind).await?);

    let serving = server.clone();
    let handle = tokio::spawn(async move { serving.start().await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    server.shutdown();

    handle.await?
}

async fn run_transfer(config: AppConfig, args: TransferArgs) -> Result<()> {
    let defaults = config.destinations.clone();
    let photos = args
        .photos
        .or_else(|| defaults.as_ref().map(|d| d.photos.clone()));
    let raw_videos = args
        .raw_videos
        .or_else(|| defaults.as_ref().map(|d| d.raw_videos.clone()));
    let (Some(photos), Some(raw_videos)) = (photos, raw_videos) else {
        bail!("Destinations missing: pass --photos and --raw-videos or set [destinations] in config");
    };

    let request = BatchRequest {
        source: args.source,
        destinations: TransferDestinations { photos, raw_videos },
        options: Some(BatchOptions {
            skip_validation: args.skip_validation,
        }),
    };

    if args.remote {
        let print_events = args.events;
        let result = RpcClient::new(config.rpc_bind)
            .start_transfer(&request, |event| {
                if print_events {
                    println!("{}", event);
                }
            })
            .await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let ctx = AppContext::new(config);
    let (observer, mut rx) = ChannelObserver::channel();
    let print_events = args.events;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if print_events {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            }
        }
    });

    let result = ctx.run_batch(request, &observer).await?;
    drop(observer);
    printer.await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!("{} of {} files failed", result.errors.len(), result.files_total);
    }
    Ok(())
}

async fn run_status(config: &AppConfig) -> Result<()> {
    let state = RpcClient::new(config.rpc_bind).transfer_state().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
