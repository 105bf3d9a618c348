// Main binary that starts the filtering DNS server and its control plane
use std::io::stderr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use hickory_server::authority::Catalog;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

use warden_dns::{DnsServer, FilterHandler};
use warden_filter::FilterEngine;
use warden_server::ApiServer;

/// How long a graceful shutdown may take before the process is forced out.
const SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(author, version, about = "Warden per-client DNS filtering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the DNS filter and its REST control plane
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Client configuration document
    #[arg(long, default_value = "/clients.json")]
    config: PathBuf,

    /// Directory holding blocklist files
    #[arg(long, default_value = "/blocklists")]
    blocklist_dir: PathBuf,

    /// Directory holding whitelist files
    #[arg(long, default_value = "/whitelists")]
    whitelist_dir: PathBuf,

    /// Control-plane API port
    #[arg(long, default_value_t = 8099)]
    api_port: u16,

    /// DNS listen address (UDP + TCP)
    #[arg(long, default_value = "0.0.0.0:53")]
    dns_listen: SocketAddr,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "warden={level},warden_filter={level},warden_dns={level},warden_server={level},hickory_server=warn,hickory_proto=warn,tower=warn,hyper=warn,mio=warn",
        level = default_level
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Ctrl+C received, sending shutdown signal...");
        let _ = shutdown_tx_clone.send(());

        // Force exit if graceful shutdown stalls.
        tokio::time::sleep(tokio::time::Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
        println!("Forcing exit after timeout");
        std::process::exit(0);
    });

    #[cfg(unix)]
    {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Ok(mut signal) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                signal.recv().await;
                info!("Received SIGTERM, sending shutdown signal...");
                let _ = shutdown_tx_clone.send(());
            }
        });
    }

    match cli.command {
        Commands::Serve(args) => serve(args, shutdown_rx).await,
    }
}

async fn serve(args: ServeArgs, shutdown_rx: watch::Receiver<()>) -> Result<()> {
    // One engine per process, shared by both servers.
    let engine = Arc::new(FilterEngine::new(
        args.config,
        args.blocklist_dir,
        args.whitelist_dir,
    ));
    engine.initialize()?;

    // The downstream handler is an empty catalog; recursion and zone
    // data are out of scope here.
    let dns_handler = FilterHandler::new(engine.clone(), Catalog::new());
    let dns_listen = args.dns_listen;
    tokio::spawn(async move {
        if let Err(e) = DnsServer::start(dns_listen, dns_handler).await {
            error!("DNS server failed: {e}");
        }
    });

    ApiServer::new(engine, args.api_port)
        .run(shutdown_rx)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e))?;

    info!("Shutdown complete");
    Ok(())
}
