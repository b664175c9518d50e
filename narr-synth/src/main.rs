//! narr-synth - batch narration runner
//!
//! ```bash
//! narr-synth run --chunks chunks.json
//! narr-synth summary
//! narr-synth reset --chunk 12 --chunk 40
//! narr-synth init-config
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use narr_common::config::{
    default_config_path, load_toml_config, resolve_root_folder, write_toml_config, LoggingConfig,
};
use narr_common::{ChunkDescriptor, ChunkId};
use narr_synth::engine::EngineRegistry;
use narr_synth::{JobRunner, SynthConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for narr-synth
#[derive(Parser, Debug)]
#[command(name = "narr-synth")]
#[command(about = "Resumable long-form narration pipeline")]
#[command(version)]
struct Args {
    /// Job root folder
    #[arg(long, global = true, env = "NARR_ROOT_FOLDER")]
    root: Option<PathBuf>,

    /// Configuration file (default: <config dir>/narr/narr.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every pending chunk, creating or resuming the job
    Run {
        /// JSON array of chunk descriptors
        #[arg(long, value_name = "FILE")]
        chunks: Option<PathBuf>,
    },
    /// Print the job summary
    Summary {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Return failed chunks to pending
    Reset {
        #[arg(long = "chunk", value_name = "ID", required = true)]
        chunks: Vec<u32>,
    },
    /// Write a configuration file with every default filled in
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &logging.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn read_descriptors(path: &Path) -> Result<Vec<ChunkDescriptor>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read chunk list {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse chunk list {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);

    if let Command::InitConfig { force } = args.command {
        let path = config_path.context("No config directory on this platform; pass --config")?;
        if path.exists() && !force {
            anyhow::bail!("{} exists; pass --force to replace it", path.display());
        }
        write_toml_config(&SynthConfig::default(), &path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let config: SynthConfig = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => SynthConfig::default(),
    };
    init_logging(&config.logging)?;

    let root = resolve_root_folder(args.root.as_deref(), config.root_folder.as_deref());
    info!(root = %root.display(), version = env!("CARGO_PKG_VERSION"), "narr-synth starting");

    let registry = EngineRegistry::from_profiles(&config.engines, config.pool.chunk_timeout());
    let runner = JobRunner::open(&root, config, registry).context("Failed to open job")?;

    match args.command {
        Command::Run { chunks } => {
            if let Some(path) = chunks {
                let descriptors = read_descriptors(&path)?;
                runner.initialize_job(&descriptors)?;
            } else if !runner.store().exists() {
                anyhow::bail!("no job under {}; pass --chunks to create one", root.display());
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing in-flight attempts");
                    on_signal.cancel();
                }
            });

            let outcome = runner.run(cancel).await?;
            let summary = runner.summary()?;
            print!("{}", summary);
            info!(
                manifest = %outcome.manifest_path.display(),
                entries = outcome.manifest.entries.len(),
                "Run complete"
            );
        }
        Command::Summary { json } => {
            let summary = runner.summary()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
        }
        Command::Reset { chunks } => {
            let ids: Vec<ChunkId> = chunks.into_iter().map(ChunkId).collect();
            let receipt = runner.reset_chunks(&ids)?;
            println!("Reset {} chunk(s) at revision {}", ids.len(), receipt.revision);
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
