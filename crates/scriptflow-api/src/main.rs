use anyhow::Result;
use clap::Parser;
use scriptflow_api::Server;
use scriptflow_core::{ConfigManager, LogFormat};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str =
    "scriptflow_api=debug,scriptflow_queue=info,scriptflow_workflow=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "scriptflow-api", version, about = "Script analysis and revision job API")]
struct Cli {
    /// Directory holding default.toml, {env}.toml and local.toml
    #[arg(long, env = "SCRIPTFLOW_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment name (development, production, ...)
    #[arg(long)]
    env: Option<String>,

    /// Print the effective configuration (secrets omitted) and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = ConfigManager::new(cli.config_dir, cli.env).load()?;

    if cli.print_config {
        println!("{}", settings.to_toml()?);
        return Ok(());
    }

    init_tracing(settings.logging.format);
    tracing::info!(
        environment = %settings.server.environment,
        "Starting scriptflow-api {}",
        env!("CARGO_PKG_VERSION")
    );

    Server::new(settings)?.run().await
}
