use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;

use natours::config::{AppConfig, DeploymentMode};
use natours::logging::{init_logging, LoggingConfig};
use natours::server;

#[derive(Parser, Debug)]
#[command(name = "natours")]
#[command(version)]
#[command(about = "Tour booking HTTP server")]
struct Cli {
    /// TOML configuration file (environment variables prefixed NATOURS__ still apply)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Deployment mode: development or production
    #[arg(long)]
    mode: Option<DeploymentMode>,

    /// Port to listen on
    #[arg(long, short)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    bind: Option<String>,

    /// Suppress all output except errors
    #[arg(long, short)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
}

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?,
    };
    if let Some(mode) = cli.mode {
        config = config.with_mode(mode);
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(bind) = &cli.bind {
        config = config.with_bind_address(bind.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    init_logging(&LoggingConfig::resolve(config.mode, cli.verbose, cli.quiet));

    match server::serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
