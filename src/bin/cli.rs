//! CLI for file operations against the storage nodes

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use minidfs::common::format_bytes;
use minidfs::{ClusterClient, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs distributed file store CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file listing the nodes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node addresses, overriding the configuration (comma separated)
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<SocketAddr>,

    /// Reachability probe timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to every reachable node
    Upload {
        /// Local file
        file: PathBuf,

        /// Stored name (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Download a file from the first node that has it
    Download {
        /// Stored name
        name: String,

        /// Output directory
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },

    /// Delete a file from every reachable node
    Delete {
        /// Stored name
        name: String,
    },

    /// List files on every reachable node
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.probe_timeout());
    let cluster = if cli.nodes.is_empty() {
        ClusterClient::new(config.node_addrs(), timeout)
    } else {
        ClusterClient::new(cli.nodes, timeout)
    };

    match cli.command {
        Commands::Upload { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("upload path has no file name")?,
            };
            let data = Bytes::from(
                tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?,
            );

            let results = cluster.upload(&name, data.clone()).await;
            if results.is_empty() {
                anyhow::bail!("no node is reachable");
            }
            for res in results {
                match res.result {
                    Ok(reply) => println!("{}: {}", res.addr, reply),
                    Err(e) => println!("{}: error uploading: {}", res.addr, e),
                }
            }
            println!("Uploaded {} ({})", name, format_bytes(data.len() as u64));
        }

        Commands::Download { name, output } => {
            let (addr, body) = cluster.download(&name).await?;
            let path = output.join(format!("downloaded_{}", name));
            tokio::fs::write(&path, &body)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!(
                "Downloaded {} from {} to {} ({})",
                name,
                addr,
                path.display(),
                format_bytes(body.len() as u64)
            );
        }

        Commands::Delete { name } => {
            for res in cluster.delete(&name).await {
                match res.result {
                    Ok(reply) => println!("{}: {}", res.addr, reply),
                    Err(e) => println!("{}: error deleting: {}", res.addr, e),
                }
            }
        }

        Commands::List => {
            for res in cluster.list().await {
                println!("Files on {}:", res.addr);
                match res.result {
                    Ok(names) if names.is_empty() => println!("  (none)"),
                    Ok(names) => names.iter().for_each(|name| println!("  {}", name)),
                    Err(e) => println!("  error listing: {}", e),
                }
            }
        }
    }

    Ok(())
}
