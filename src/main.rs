//! SIP Ingest CLI
//!
//! Inspects, fingerprints and submits preservation masters to the ingest
//! service configured through `SIP_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sip_ingest::{
    IngestConfig, IngestReceipt, IngestState, LayerInspector, SelectionOutcome, SubmissionFile,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "sip-ingest", version, about = "SIP ingest client")]
struct Cli {
    /// Emit JSON output on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Process a file and submit it to the ingest service.
    Ingest {
        file: PathBuf,

        /// Submit multi-layer files without asking.
        #[arg(long, short)]
        yes: bool,
    },

    /// Report whether a PSD/PSB/TIFF file carries layers or pages.
    Inspect { file: PathBuf },

    /// Print the SHA-256 fixity digest of a file.
    Hash { file: PathBuf },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestOutput<'a> {
    #[serde(flatten)]
    receipt: &'a IngestReceipt,
    iiif_manifest_url: Option<String>,
}

#[derive(Serialize)]
struct HashOutput<'a> {
    file: &'a Path,
    sha256: &'a str,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sip_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let config = IngestConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        IngestConfig::default()
    });

    let cli = Cli::parse();
    let json = cli.json;

    match cli.command {
        Command::Ingest { file, yes } => ingest(config, &file, yes, json).await,
        Command::Inspect { file } => inspect(&config, &file, json).await,
        Command::Hash { file } => hash(&config, &file, json).await,
    }
}

async fn ingest(config: IngestConfig, path: &Path, confirm_layers: bool, json: bool) -> Result<()> {
    let file = SubmissionFile::from_path(path)
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let mut pipeline = sip_ingest::http_pipeline(config)?;

    tracing::info!(file_name = %file.name(), size = file.size(), "Submitting file");

    match pipeline.select_file(file).await {
        SelectionOutcome::Admitted { advisory } => {
            if let Some(advisory) = advisory {
                eprintln!("warning: {}", advisory);
            }
        }
        SelectionOutcome::ConfirmationRequired(check) => {
            let message = check.message.unwrap_or_default();
            if !confirm_layers {
                pipeline.discard_pending();
                bail!("{} (rerun with --yes to submit anyway)", message);
            }
            eprintln!("warning: {}", message);
            pipeline.confirm_pending();
        }
    }

    if !pipeline.start_processing() {
        bail!("Pipeline is busy");
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    while let Some(snapshot) = pipeline.next_event().await {
        pb.set_message(snapshot.progress.message.clone());
    }
    pb.finish_and_clear();

    if pipeline.state() != IngestState::Success {
        bail!(
            "{}",
            pipeline.last_error().unwrap_or("Ingest did not complete")
        );
    }

    let receipt = pipeline
        .receipt()
        .context("Ingest finished without a receipt")?;
    let iiif_manifest_url = pipeline.iiif_manifest_url();

    if json {
        let out = IngestOutput {
            receipt,
            iiif_manifest_url,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let verification = &receipt.verification;
    println!("Asset ID:     {}", verification.asset_id);
    println!("SHA-256:      {}", receipt.manifest.hash);
    println!("Fixity check: {}", verification.fixity_check);
    if !verification.message.is_empty() {
        println!("Message:      {}", verification.message);
    }
    if let Some(url) = iiif_manifest_url {
        println!("IIIF:         {}", url);
    }
    Ok(())
}

async fn inspect(config: &IngestConfig, path: &Path, json: bool) -> Result<()> {
    let file = SubmissionFile::from_path(path)
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let inspector = LayerInspector::from_config(&config.inspection);

    let result = tokio::task::spawn_blocking(move || inspector.check(&file))
        .await
        .context("Task join error")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(message) = &result.message {
        println!("{}", message);
    } else {
        println!("No layers detected");
    }
    Ok(())
}

async fn hash(config: &IngestConfig, path: &Path, json: bool) -> Result<()> {
    let owned = path.to_path_buf();
    let config = config.clone();
    let digest = tokio::task::spawn_blocking(move || sip_ingest::fingerprint(&owned, &config))
        .await
        .context("Task join error")??;

    if json {
        let out = HashOutput {
            file: path,
            sha256: &digest,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}  {}", digest, path.display());
    }
    Ok(())
}
