//! custodyd: evidence custody daemon
//!
//! Usage:
//!   custodyd [--config /etc/custody/custody.toml] [--listen 0.0.0.0:4000]

mod api;
mod daemon;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use custody_core::config::CustodyConfig;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "custodyd", version, about = "Evidence custody daemon")]
struct Cli {
    /// Path to custody.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CUSTODY_CONFIG",
        default_value = "/etc/custody/custody.toml"
    )]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long, env = "CUSTODY_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "CUSTODY_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "CUSTODY_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before logging is up; a missing file is reported below.
    let (mut config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.daemon.log_format.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    });
    init_logging(&level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    if let Some(listen) = cli.listen {
        config.daemon.listen = listen;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        listen = %config.daemon.listen,
        "custodyd starting"
    );

    daemon::run(config).await
}

async fn load_config(path: &Path) -> Result<(CustodyConfig, bool)> {
    if tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("checking config {}", path.display()))?
    {
        let config = CustodyConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((CustodyConfig::default(), false))
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
