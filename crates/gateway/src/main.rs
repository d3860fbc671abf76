//! swarmgate — multi-agent network gateway.

mod api;
mod bootstrap;
mod observability;
mod relay;
mod runtime;
mod state;
mod webhooks;

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "swarmgate", about = "Multi-agent network gateway and relay")]
struct Cli {
    /// Path to a TOML server config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8484. Overrides the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Directory for durable state. Overrides the config file.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bootstrap::run(bootstrap::BootOptions {
        config: cli.config,
        listen: cli.listen,
        state_dir: cli.state_dir,
        log_json: cli.log_json,
    })
    .await
}
