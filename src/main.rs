//! Flock - distributed agent control plane
//!
//! This is the main entry point for the Flock node server.

use anyhow::Result;
use clap::Parser;
use flock::boot::FlockNode;
use flock::config::FlockConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flock", about = "Distributed control plane for agent fleets")]
struct Cli {
    /// Config file path (overrides $FLOCK_CONFIG and the defaults)
    #[arg(long)]
    config: Option<String>,

    /// Data directory override
    #[arg(long)]
    data_dir: Option<String>,

    /// Gateway port override
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("flock=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    if let Some(config_path) = &cli.config {
        // SAFETY: set before any config read and before worker threads
        // spawn anything that inspects the environment.
        unsafe { std::env::set_var("FLOCK_CONFIG", config_path) };
    }

    let mut config = FlockConfig::load();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    info!(
        node_id = %config.node_id,
        topology = ?config.topology,
        backend = ?config.db_backend,
        "starting Flock node"
    );

    let node = FlockNode::boot(config).await?;

    let serve = node.serve();
    tokio::select! {
        result = serve => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    node.shutdown().await;
    Ok(())
}
