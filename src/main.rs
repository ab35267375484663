// Kindred CLI - thin adapter over the engine.
//
// Each subcommand loads the configuration, constructs the engine with the
// built-in extractor and embedder, forwards exactly one core call, and
// prints the result as JSON. Errors come out as {code, message} envelopes.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kindred::embeddings::HashingEmbedder;
use kindred::extract::PlainTextExtractor;
use kindred::{Engine, EngineConfig};

#[derive(Parser)]
#[command(name = "kindred", version, about = "Local file recommendation engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan one or more roots and update the store.
    Scan {
        /// Root directory; defaults to the configured roots.
        root: Option<PathBuf>,
    },
    /// Recommend files related to the given one.
    Recommend {
        path: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    /// Record an access event for a path.
    Log { path: String },
    /// Engine health summary.
    Health,
    /// List all registered live files.
    Files,
    /// Show the most recently accessed files.
    Activity {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kindred=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> kindred::Result<()> {
    let config = if cli.config.exists() {
        EngineConfig::from_yaml_file(&cli.config)?
    } else {
        EngineConfig::default()
    };

    let dim = config.embeddings.dim;
    let engine = Engine::new(
        config.clone(),
        Arc::new(PlainTextExtractor),
        Arc::new(HashingEmbedder::new(dim)),
    )?;

    match cli.command {
        Command::Scan { root } => {
            let roots = match root {
                Some(root) => vec![root],
                None => config.scan.roots.clone(),
            };
            if roots.is_empty() {
                return Err(kindred::Error::InvalidInput(
                    "no scan root given and none configured".into(),
                ));
            }
            let shutdown = engine.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
            });
            for root in roots {
                let report = engine.scan(&root).await?;
                print_json(&serde_json::json!({
                    "root": root,
                    "report": report,
                }))
                .map_err(|e| kindred::Error::Internal(e.to_string()))?;
            }
        }
        Command::Recommend { path, limit } => {
            if !(1..=100).contains(&limit) {
                return Err(kindred::Error::InvalidInput(format!(
                    "limit must be within [1, 100], got {limit}"
                )));
            }
            let recommendations = engine.recommend(&path, limit).await?;
            print_json(&recommendations).map_err(|e| kindred::Error::Internal(e.to_string()))?;
        }
        Command::Log { path } => {
            let summary = engine.log_activity(&path).await?;
            print_json(&summary).map_err(|e| kindred::Error::Internal(e.to_string()))?;
        }
        Command::Health => {
            let health = engine.health()?;
            print_json(&health).map_err(|e| kindred::Error::Internal(e.to_string()))?;
        }
        Command::Files => {
            let files = engine.list_files()?;
            print_json(&files).map_err(|e| kindred::Error::Internal(e.to_string()))?;
        }
        Command::Activity { limit } => {
            let recent = engine.recent_activity(limit)?;
            print_json(&recent).map_err(|e| kindred::Error::Internal(e.to_string()))?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Structured envelope on stdout, human-readable line on stderr.
            println!("{}", e.envelope());
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
