//! # Fraud Assist CLI (`fraudctl`)
//!
//! ## Usage
//!
//! ```bash
//! fraudctl --config ./config/fraud.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fraudctl reindex` | Load the docs directory and build the index |
//! | `fraudctl ask "<message>"` | Answer one customer message |
//! | `fraudctl search "<query>"` | Show hybrid retrieval results |
//! | `fraudctl health` | Index and provider status |
//! | `fraudctl serve` | Start the HTTP API |
//!
//! The index lives in memory, so every command builds it from the docs
//! directory on startup.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fraud_assist::ask::{self, TransactionArgs};
use fraud_assist::assistant::Assistant;
use fraud_assist::{config, logging, search, server, status};

/// Fraud Assist: grounded answers to card and transfer fraud questions.
#[derive(Parser)]
#[command(
    name = "fraudctl",
    about = "Fraud Assist: grounded answers to bank fraud questions from procedure documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fraud.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the docs directory and rebuild the index.
    Reindex {
        /// Rebuild even when the corpus is unchanged.
        #[arg(long)]
        force: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer one customer message.
    Ask {
        message: String,

        /// Transaction channel: online, terminal, virement, prelevement, cheque, autre.
        #[arg(long)]
        channel: Option<String>,

        #[arg(long)]
        amount: Option<f64>,

        /// ISO 4217 code, e.g. EUR.
        #[arg(long)]
        currency: Option<String>,

        #[arg(long)]
        merchant: Option<String>,

        /// Country of the transaction (ISO code or name).
        #[arg(long)]
        country: Option<String>,

        /// Transaction date, YYYY-MM-DD.
        #[arg(long)]
        date: Option<String>,

        /// The customer has not confirmed the fraud yet.
        #[arg(long)]
        not_confirmed: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run hybrid retrieval for a query and show ranked chunks.
    Search {
        query: String,

        /// Show semantic and BM25 components of each score.
        #[arg(long)]
        explain: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show index readiness, counts and providers.
    Health {
        #[arg(long)]
        json: bool,
    },

    /// Build the index, then serve the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);
    let assistant = Assistant::new(cfg)?;

    match cli.command {
        Commands::Reindex { force, json } => {
            status::run_reindex(&assistant, force, json).await?;
        }
        Commands::Ask {
            message,
            channel,
            amount,
            currency,
            merchant,
            country,
            date,
            not_confirmed,
            json,
        } => {
            let tx = TransactionArgs {
                channel,
                amount,
                currency,
                merchant,
                country,
                date,
            };
            ask::run_ask(&assistant, &message, tx, not_confirmed, json).await?;
        }
        Commands::Search {
            query,
            explain,
            json,
        } => {
            search::run_search(&assistant, &query, explain, json).await?;
        }
        Commands::Health { json } => {
            status::run_health(&assistant, json).await?;
        }
        Commands::Serve => {
            let report = assistant.reindex(false).await?;
            for e in &report.errors {
                eprintln!("Warning: {}", e);
            }
            server::run_server(Arc::new(assistant)).await?;
        }
    }

    Ok(())
}
