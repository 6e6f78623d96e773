//! # Rulesmith CLI
//!
//! The `rulesmith` binary hosts the rules service and a couple of
//! operational commands.
//!
//! ## Usage
//!
//! ```bash
//! rulesmith --config ./config/rulesmith.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rulesmith init` | Create the SQLite database and run schema migrations |
//! | `rulesmith serve` | Start the HTTP/JSON API server |
//! | `rulesmith search <game-id> "<query>"` | One-shot similarity search |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rulesmith::{config, db, migrate, search};

/// Rulesmith — a board-game rules service with semantic search and
/// rules-grounded chat.
#[derive(Parser)]
#[command(
    name = "rulesmith",
    about = "Board-game rules service: PDF ingestion, semantic search, grounded chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rulesmith.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Start the HTTP/JSON API server.
    ///
    /// Binds to `[server].bind` and serves the REST API consumed by the web
    /// client.
    Serve,

    /// Run a one-shot similarity search against a game's stored chunks.
    ///
    /// Useful for checking what the chat orchestrator would retrieve.
    Search {
        /// Game id to search within.
        game_id: i64,

        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            rulesmith::server::run_server(&cfg).await?;
        }
        Commands::Search {
            game_id,
            query,
            limit,
        } => {
            let pool = db::connect(&cfg).await?;
            let limit = limit
                .unwrap_or(cfg.retrieval.search_limit_default)
                .clamp(1, cfg.retrieval.search_limit_max);

            let response =
                search::search_chunks(&pool, &cfg, game_id, &query, limit as usize).await?;

            if response.results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in response.results.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] chunk {} ({})",
                        i + 1,
                        result.score,
                        result.chunk_index,
                        result.source_type.as_str()
                    );
                    println!(
                        "    \"{}\"",
                        result.chunk_text.chars().take(160).collect::<String>()
                    );
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}
