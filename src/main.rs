use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{cache, config, SimilarityEngine, VectorIndex};
use log::info;

#[derive(Parser)]
#[command(name = "facematch")]
#[command(version, about = "Face similarity index - catalog inspection and query drivers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show catalog status
    Status,
    /// Match a query embedding (a cache record JSON file) against the catalog
    Match {
        /// Path to the embedding record
        query: PathBuf,
        /// Number of catalog matches to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Similarity of a query embedding to one named catalog identity
    Similarity {
        /// Path to the embedding record
        query: PathBuf,
        /// Reference identity name
        #[arg(short, long)]
        name: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Status => status(&cfg),
        Commands::Match { query, top_k } => {
            run_match(&cfg, &query, top_k.unwrap_or(cfg.default_top_k))
        }
        Commands::Similarity { query, name } => similarity(&cfg, &query, &name),
        Commands::Config => open_config(),
    }
}

fn engine(cfg: &config::Config) -> SimilarityEngine {
    SimilarityEngine::new(Arc::new(VectorIndex::open(&cfg.data_dir)))
}

fn status(cfg: &config::Config) -> Result<()> {
    let index = VectorIndex::open(&cfg.data_dir);
    index.ensure_loaded().context("loading catalog")?;
    let count = index.len()?;
    if count == 0 {
        info!("catalog is empty; run the index build to populate {}", cfg.data_dir.display());
    } else {
        info!("catalog loaded: {} identities", count);
    }
    Ok(())
}

fn run_match(cfg: &config::Config, query: &PathBuf, top_k: usize) -> Result<()> {
    let embedding = cache::read_record(query).context("reading query embedding")?;
    let engine = engine(cfg);
    let matches = engine.top_matches(&embedding, top_k)?;
    if matches.is_empty() {
        anyhow::bail!("catalog is empty; build the index first");
    }
    for (rank, m) in matches.iter().enumerate() {
        info!("{}. {} (score {:.3})", rank + 1, m.name, m.score);
    }
    Ok(())
}

fn similarity(cfg: &config::Config, query: &PathBuf, name: &str) -> Result<()> {
    let embedding = cache::read_record(query).context("reading query embedding")?;
    let engine = engine(cfg);
    match engine.score_against(&embedding, name)? {
        Some(reference) => {
            info!("{}: score {:.3}", reference.name, reference.score);
            Ok(())
        }
        None => anyhow::bail!("identity '{}' not found in catalog", name),
    }
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
