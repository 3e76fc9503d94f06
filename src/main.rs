use samarth_engine::response::{format_number, EXAMPLE_QUERIES};
use samarth_engine::{EngineConfig, QueryEngine, QueryResponse, Vocabulary};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "samarth")]
#[command(about = "Ask questions about Indian agricultural and climate data")]
#[command(version)]
struct Args {
    /// Directory holding datasets.json and the CSV files it lists
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Persist cached answers to this JSON file
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Query {
        /// The question in natural language
        text: String,

        /// Print the full JSON payload
        #[arg(long)]
        json: bool,
    },
    /// Answer every line of a file concurrently
    Batch {
        /// File with one question per line
        file: PathBuf,

        /// Print the full JSON payloads
        #[arg(long)]
        json: bool,
    },
    /// List loaded datasets
    Datasets {
        /// Only datasets whose key, name, description or category match
        #[arg(long, conflicts_with = "key")]
        search: Option<String>,

        /// Show metadata and sample rows for one dataset
        #[arg(long)]
        key: Option<String>,

        /// Number of sample rows shown with --key
        #[arg(long, default_value_t = 5, requires = "key")]
        rows: usize,
    },
    /// List recognized states and union territories
    States,
    /// List recognized crops
    Crops,
    /// Show example questions
    Examples,
    /// Inspect or clear the answer cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry count, capacity, TTL and hit/miss counters
    Stats,
    /// Remove every cached answer
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env().context("Invalid SAMARTH_* configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = args.cache_file {
        config.cache_file = Some(path);
    }

    match args.command {
        Commands::Query { text, json } => {
            let engine = build_engine(config)?;
            let response = engine.process(&text);
            print_response(&response, json)?;
        }
        Commands::Batch { file, json } => run_batch(config, file, json).await?,
        Commands::Datasets { search, key, rows } => {
            let engine = build_engine(config)?;
            if let Some(key) = key {
                let info = engine
                    .catalog()
                    .info(&key, rows)
                    .with_context(|| format!("Failed to read dataset {}", key))?;
                match info {
                    Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                    None => {
                        let known = engine.catalog().snapshot().keys().join(", ");
                        anyhow::bail!("Unknown dataset '{}'. Available: {}", key, known);
                    }
                }
                return Ok(());
            }
            let listing = match search {
                Some(term) => engine.catalog().search(&term),
                None => engine.catalog().describe(),
            };
            if listing.is_empty() {
                println!("No datasets found.");
            }
            for dataset in listing {
                println!("{} - {}", dataset.key, dataset.name);
                println!(
                    "    {} rows | columns: {} | updated: {}",
                    dataset.rows,
                    dataset.columns.join(", "),
                    if dataset.last_updated.is_empty() {
                        "unknown"
                    } else {
                        dataset.last_updated.as_str()
                    }
                );
                if !dataset.description.is_empty() {
                    println!("    {}", dataset.description);
                }
            }
        }
        Commands::States => {
            let vocabulary = load_vocabulary(&config)?;
            for state in &vocabulary.states {
                let kind = if state.union_territory { " (UT)" } else { "" };
                println!("{}{}", state.name, kind);
            }
        }
        Commands::Crops => {
            let vocabulary = load_vocabulary(&config)?;
            for crop in &vocabulary.crops {
                if crop.synonyms.is_empty() {
                    println!("{}", crop.name);
                } else {
                    println!("{} ({})", crop.name, crop.synonyms.join(", "));
                }
            }
        }
        Commands::Examples => {
            for example in EXAMPLE_QUERIES {
                println!("{}", example);
            }
        }
        Commands::Cache { action } => {
            let engine = build_engine(config)?;
            match action {
                CacheAction::Stats => {
                    println!("{}", serde_json::to_string_pretty(&engine.cache_stats())?);
                }
                CacheAction::Clear => {
                    let removed = engine.clear_cache();
                    println!("Removed {} cached answers.", removed);
                }
            }
        }
    }

    Ok(())
}

fn load_vocabulary(config: &EngineConfig) -> Result<Vocabulary> {
    match &config.vocabulary_file {
        Some(path) => Vocabulary::from_json_file(path)
            .with_context(|| format!("Failed to load vocabulary {}", path.display())),
        None => Ok(Vocabulary::builtin()),
    }
}

fn build_engine(config: EngineConfig) -> Result<QueryEngine> {
    let data_dir = config.data_dir.clone();
    QueryEngine::from_config(config)
        .with_context(|| format!("Failed to start engine with data from {}", data_dir.display()))
}

async fn run_batch(config: EngineConfig, file: PathBuf, json: bool) -> Result<()> {
    let contents = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let questions: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();

    let engine = Arc::new(build_engine(config)?);
    info!("Running {} questions", questions.len());

    let handles: Vec<_> = questions
        .into_iter()
        .map(|question| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || engine.process(&question))
        })
        .collect();

    let mut responses = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(response) => responses.push(response),
            Err(e) => error!("Batch task failed: {}", e),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
    } else {
        for response in &responses {
            println!("Q: {}", response.query);
            print_response(response, false)?;
            println!();
        }
    }
    Ok(())
}

fn print_response(response: &QueryResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    println!();
    println!(
        "intent: {} | confidence: {} | cached: {}",
        response.intent,
        format_number(response.confidence * 100.0) + "%",
        response.cached
    );
    if let Some(class) = &response.error {
        println!("error: {}", class);
    }
    for citation in &response.citations {
        println!(
            "source: {} ({}), {} of {} records, {:?}",
            citation.dataset_name,
            citation.source_organization,
            citation.records_analyzed,
            citation.total_records_available,
            citation.data_freshness
        );
    }
    Ok(())
}
