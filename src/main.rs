use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use freightline_config::Step;
use freightline_credentials::{CredentialType, Credentials, InMemoryCredentialsDatabase};
use freightline_promotion::{
  Checkpoint, Context, Engine, EngineConfig, ExecutorConfig, PromotionPhase, PromotionResult,
};
use freightline_steps::builtin_registry;

/// Freightline - promotes Freight through Stages with resumable step pipelines
#[derive(Parser)]
#[command(name = "freightline")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.freightline)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run one pass of a promotion, resuming from its stored checkpoint
  Promote {
    /// Path to the steps file (JSON array of steps)
    steps_file: PathBuf,

    /// Path to the promotion context file (JSON)
    #[arg(long)]
    context: PathBuf,

    /// Discard the stored checkpoint and start from the first step
    #[arg(long)]
    reset: bool,

    /// Where to create per-run working directories (default: system temp)
    #[arg(long)]
    work_dir_root: Option<PathBuf>,
  },
}

/// An entry of `<data-dir>/credentials.json`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialEntry {
  namespace: String,
  #[serde(rename = "type")]
  credential_type: CredentialType,
  #[serde(rename = "repoURL")]
  repo_url: String,
  #[serde(flatten)]
  credentials: Credentials,
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".freightline"),
  };

  match cli.command {
    Some(Commands::Promote {
      steps_file,
      context,
      reset,
      work_dir_root,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      let phase = rt.block_on(promote(steps_file, context, reset, work_dir_root, data_dir))?;
      match phase {
        PromotionPhase::Failed | PromotionPhase::Errored | PromotionPhase::Aborted => {
          Ok(ExitCode::FAILURE)
        }
        PromotionPhase::Running | PromotionPhase::Succeeded => Ok(ExitCode::SUCCESS),
      }
    }
    None => {
      println!("freightline - use --help to see available commands");
      Ok(ExitCode::SUCCESS)
    }
  }
}

async fn promote(
  steps_file: PathBuf,
  context_file: PathBuf,
  reset: bool,
  work_dir_root: Option<PathBuf>,
  data_dir: PathBuf,
) -> Result<PromotionPhase> {
  let steps: Vec<Step> = read_json(&steps_file).await?;
  let mut ctx: Context = read_json(&context_file).await?;

  let checkpoint_path = data_dir
    .join("checkpoints")
    .join(format!("{}.json", ctx.promotion));
  if reset {
    if tokio::fs::try_exists(&checkpoint_path).await? {
      tokio::fs::remove_file(&checkpoint_path)
        .await
        .with_context(|| format!("failed to remove checkpoint: {}", checkpoint_path.display()))?;
    }
  } else if tokio::fs::try_exists(&checkpoint_path).await? {
    let checkpoint: Checkpoint = read_json(&checkpoint_path).await?;
    info!(
      promotion = %ctx.promotion,
      current_step = checkpoint.current_step,
      "checkpoint_loaded"
    );
    ctx.resume(checkpoint);
  }

  let credentials = load_credentials(&data_dir.join("credentials.json")).await?;

  let registry = builtin_registry().context("failed to register built-in steps")?;
  let engine = Engine::new(
    EngineConfig { work_dir_root },
    Arc::new(registry),
    ExecutorConfig {
      credentials: Some(Arc::new(credentials)),
      ..Default::default()
    },
  );

  let cancel = CancellationToken::new();
  let on_interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling promotion");
      on_interrupt.cancel();
    }
  });

  let result = engine.promote(ctx, &steps, &cancel).await;

  if let Some(parent) = checkpoint_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create directory: {}", parent.display()))?;
  }
  tokio::fs::write(
    &checkpoint_path,
    serde_json::to_string_pretty(&result.checkpoint())?,
  )
  .await
  .with_context(|| format!("failed to write checkpoint: {}", checkpoint_path.display()))?;

  println!("{}", serde_json::to_string_pretty(&summary(&result))?);

  Ok(result.status)
}

fn summary(result: &PromotionResult) -> serde_json::Value {
  serde_json::json!({
    "status": result.status,
    "message": result.message,
    "currentStep": result.current_step,
    "retryAfterSeconds": result.retry_after.map(|d| d.as_secs()),
    "error": result.error.as_ref().map(|e| e.to_string()),
    "healthChecks": result.health_checks,
    "steps": result.step_execution_metadata,
    "state": result.state,
  })
}

async fn load_credentials(path: &Path) -> Result<InMemoryCredentialsDatabase> {
  let mut db = InMemoryCredentialsDatabase::new();
  if !tokio::fs::try_exists(path).await? {
    return Ok(db);
  }

  let entries: Vec<CredentialEntry> = read_json(path).await?;
  for entry in entries {
    db.insert(
      &entry.namespace,
      entry.credential_type,
      &entry.repo_url,
      entry.credentials,
    )
    .with_context(|| format!("invalid credentials entry for {}", entry.repo_url))?;
  }
  info!(entries = db.len(), "credentials_loaded");
  Ok(db)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse file: {}", path.display()))
}
