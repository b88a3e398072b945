use anyhow::Result;
use clap::Parser;
use minidfs::manager::{spawn_line_reader, ControlLoop, ControlReport};
use minidfs::{Config, NodeManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minidfs-server")]
#[command(about = "minidfs storage nodes with an operator control loop on stdin")]
#[command(version)]
struct Args {
    /// TOML configuration file (defaults: 3 nodes on ports 5001-5003)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start every node before reading operator commands
    #[arg(long)]
    start_all: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let log_level = args.log_level.unwrap_or_else(|| config.log_level.clone());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting minidfs v{}", minidfs::VERSION);
    tracing::info!("Nodes: {}", config.nodes.len());
    let manager = Arc::new(NodeManager::new(&config));
    tracing::info!("Worker pool: {}", manager.pool().capacity());
    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ControlReport>();

    let printer = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            println!("{}", report);
        }
    });

    if args.start_all {
        for index in 0..manager.len() {
            if let Err(e) = manager.start(index).await {
                tracing::error!("Server {} failed to start: {}", index + 1, e);
            }
        }
    }

    let n = manager.len();
    println!("Type command to control servers:");
    println!("  start1..start{n}, shutdown1..shutdown{n}");
    println!("  startall, shutdownall, status");

    let stdin = spawn_line_reader(BufReader::new(std::io::stdin()), 16)?;
    let control = ControlLoop::new(manager.clone(), stdin, report_tx);

    let outcome = tokio::select! {
        res = control.run() => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    let stopped = manager.stop_all().await;
    tracing::info!("Stopped {} node(s)", stopped.len());
    printer.abort();

    outcome?;
    Ok(())
}
