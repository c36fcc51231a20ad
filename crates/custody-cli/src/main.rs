//! custody: evidence custody CLI
//!
//! Commands:
//!   upload <file> --container <id> --evidence-id <id>   encrypt, store and anchor a file
//!   retrieve <container> <evidence> [-o <path>]          decrypt and verify a file
//!   confirm <container> <index>                          confirm a ledger entry
//!   reconcile [--json]                                   verify every stored record
//!   verify-ledger                                        recompute the ledger hash chain
//!   config show                                          display current configuration
//!
//! Operates directly on the stores named in custody.toml; no daemon needed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use custody_core::config::CustodyConfig;
use custody_core::EvidenceType;
use custody_pipeline::{Custody, RecordStatus, UploadRequest};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "custody",
    version,
    about = "Evidence custody client",
    long_about = "custody: upload, retrieve, confirm and reconcile evidence held in custody"
)]
struct Cli {
    /// Path to custody.toml configuration file
    #[arg(long, short = 'c', env = "CUSTODY_CONFIG", default_value = "/etc/custody/custody.toml")]
    config: PathBuf,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "CUSTODY_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file, store the ciphertext and anchor its fingerprint
    Upload {
        /// File to upload
        file: PathBuf,
        /// Case or FIR id
        #[arg(long)]
        container: String,
        /// Evidence id, unique within the container
        #[arg(long)]
        evidence_id: String,
        /// Image, Video, Document or Other (default: inferred from the MIME type)
        #[arg(long = "type")]
        evidence_type: Option<EvidenceType>,
        /// Declared MIME type (default: guessed from the file extension)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Decrypt and verify a file against its anchored fingerprint
    Retrieve {
        container: String,
        evidence_id: String,
        /// Output path (default: the recorded filename in the current directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Mark the ledger entry at INDEX within CONTAINER as confirmed
    Confirm { container: String, index: u64 },

    /// Verify every record in the metadata repository
    Reconcile {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute the ledger's hash chain
    #[command(name = "verify-ledger")]
    VerifyLedger,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Upload {
            file,
            container,
            evidence_id,
            evidence_type,
            mime,
        } => cmd_upload(&config, &file, &container, &evidence_id, evidence_type, mime).await,
        Commands::Retrieve {
            container,
            evidence_id,
            output,
        } => cmd_retrieve(&config, &container, &evidence_id, output.as_deref()).await,
        Commands::Confirm { container, index } => cmd_confirm(&config, &container, index).await,
        Commands::Reconcile { json } => cmd_reconcile(&config, json).await,
        Commands::VerifyLedger => cmd_verify_ledger(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<CustodyConfig> {
    if path.exists() {
        CustodyConfig::from_file(path)
            .with_context(|| format!("loading config: {}", path.display()))
    } else {
        tracing::warn!("config file not found: {}  (using defaults)", path.display());
        Ok(CustodyConfig::default())
    }
}

async fn service(config: &CustodyConfig) -> Result<Custody> {
    Custody::from_config(config)
        .await
        .context("initialising custody service")
}

/// MIME type for the allow-listed extensions.
fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp4" => "video/mp4",
        "mkv" => "video/mkv",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => return None,
    })
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `custody upload` ──────────────────────────────────────────────────────────

async fn cmd_upload(
    config: &CustodyConfig,
    file: &Path,
    container: &str,
    evidence_id: &str,
    evidence_type: Option<EvidenceType>,
    mime: Option<String>,
) -> Result<()> {
    let mime_type = match mime {
        Some(m) => m,
        None => guess_mime(file)
            .with_context(|| {
                format!(
                    "cannot guess MIME type for {}; pass --mime",
                    file.display()
                )
            })?
            .to_string(),
    };
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let custody = service(config).await?;
    let pb = make_spinner("upload");
    pb.set_message(format!("{} ({} bytes)", file.display(), bytes.len()));

    let result = custody
        .upload(UploadRequest {
            container_id: container.to_string(),
            evidence_id: evidence_id.to_string(),
            evidence_type,
            mime_type,
            filename,
            bytes,
        })
        .await;
    pb.finish_and_clear();

    let receipt = result.context("upload failed")?;
    println!("uploaded:  {}/{}", receipt.container_id, receipt.evidence_id);
    println!("cid:       {}", receipt.cid);
    println!("sha256:    {}", receipt.hash_original);
    println!("type:      {}", receipt.evidence_type);
    println!("filename:  {}", receipt.filename);
    println!("ledger:    index {}", receipt.ledger_index);
    Ok(())
}

// ── `custody retrieve` ────────────────────────────────────────────────────────

async fn cmd_retrieve(
    config: &CustodyConfig,
    container: &str,
    evidence_id: &str,
    output: Option<&Path>,
) -> Result<()> {
    let custody = service(config).await?;
    let pb = make_spinner("retrieve");
    pb.set_message(format!("{container}/{evidence_id}"));
    let result = custody.retrieve(container, evidence_id).await;
    pb.finish_and_clear();

    let evidence = result.context("retrieve failed")?;
    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&evidence.filename));
    tokio::fs::write(&dest, &evidence.bytes)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;

    println!("verified:  sha256 {}", evidence.hash_original);
    println!("wrote:     {} ({} bytes)", dest.display(), evidence.bytes.len());
    Ok(())
}

// ── `custody confirm` ─────────────────────────────────────────────────────────

async fn cmd_confirm(config: &CustodyConfig, container: &str, index: u64) -> Result<()> {
    let custody = service(config).await?;
    let outcome = custody
        .confirm(container, index)
        .await
        .context("confirm failed")?;
    match outcome {
        custody_ledger::Confirmation::Confirmed => println!("confirmed: {container} #{index}"),
        custody_ledger::Confirmation::AlreadyConfirmed => {
            println!("already confirmed: {container} #{index}")
        }
    }
    Ok(())
}

// ── `custody reconcile` ───────────────────────────────────────────────────────

async fn cmd_reconcile(config: &CustodyConfig, json: bool) -> Result<()> {
    let custody = service(config).await?;
    let pb = make_spinner("reconcile");
    pb.set_message("verifying records");
    let result = custody.reconcile().await;
    pb.finish_and_clear();
    let report = result.context("reconciliation failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
    } else {
        let s = &report.summary;
        println!(
            "total {}  valid {}  hash_mismatch {}  missing_on_chain {}  missing_in_store {}  errors {}",
            s.total, s.valid, s.hash_mismatch, s.missing_on_chain, s.missing_in_store, s.errors
        );
        for d in report
            .details
            .iter()
            .filter(|d| d.status != RecordStatus::Valid)
        {
            println!(
                "  {:<17} {}/{}  {}",
                d.status.as_str(),
                d.container_id,
                d.evidence_id,
                d.error.as_deref().unwrap_or("")
            );
        }
    }

    if !report.is_clean() {
        let failed = report.summary.total - report.summary.valid;
        anyhow::bail!("{failed} record(s) failed verification");
    }
    Ok(())
}

// ── `custody verify-ledger` ───────────────────────────────────────────────────

async fn cmd_verify_ledger(config: &CustodyConfig) -> Result<()> {
    let op = custody_storage::build_operator(&custody_storage::OperatorSpec::from(&config.ledger))
        .context("building ledger operator")?;
    let report = custody_ledger::verify_stored(&op, &config.ledger.prefix)
        .await
        .context("reading ledger")?;

    println!("events:    {}", report.events);
    println!("head:      {}", report.head);
    match report.first_broken {
        None => {
            println!("chain:     intact");
            Ok(())
        }
        Some(seq) => {
            println!("chain:     BROKEN at event {seq}");
            anyhow::bail!("ledger hash chain does not verify")
        }
    }
}

// ── `custody config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &CustodyConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
