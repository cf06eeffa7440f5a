// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `qpr`: command-line interface over the pattern-orchestrated analytics
//! runtime — the local equivalent of `execute_pattern`/`list_patterns`/
//! `route_intent` (spec §6.1) for operators and scripted callers who don't
//! need the HTTP daemon.

mod bootstrap;
mod commands;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "qpr", version, about = "Pattern-orchestrated analytics runtime CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory the Pattern Loader scans for `*.json` pattern documents.
    #[arg(long, global = true, default_value = "patterns")]
    pattern_dir: PathBuf,

    /// Path to a `qpr.toml` runtime config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List loaded patterns.
    ListPatterns {
        #[arg(long)]
        json: bool,
    },
    /// List registered capability identifiers.
    ListCapabilities {
        #[arg(long)]
        json: bool,
    },
    /// List registered agent names.
    ListAgents {
        #[arg(long)]
        json: bool,
    },
    /// Validate a pattern document against the registered capabilities
    /// without adding it to the loaded index.
    Validate {
        /// Path to the pattern JSON file.
        file: PathBuf,
    },
    /// Resolve a free-text query to a pattern id (spec §4.9 `route_intent`).
    Route {
        /// The free-text query.
        query: String,

        /// Minimum keyword-overlap score required to return a match.
        #[arg(long, default_value_t = 0.2)]
        threshold: f64,

        #[arg(long)]
        json: bool,
    },
    /// Execute a pattern end to end (spec §6.1 `execute_pattern`).
    Run {
        /// Pattern id to execute.
        pattern_id: String,

        /// Requesting user id (consulted by the rights check).
        #[arg(long, default_value = "cli-user")]
        user: String,

        /// Portfolio id this request concerns.
        #[arg(long, default_value = "default")]
        portfolio: String,

        /// As-of date (`YYYY-MM-DD`); defaults to today.
        #[arg(long)]
        asof: Option<NaiveDate>,

        /// Pin an explicit pricing pack instead of resolving the latest.
        #[arg(long)]
        pricing_pack: Option<String>,

        /// Ledger commit hash this request observes.
        #[arg(long)]
        ledger_commit: Option<String>,

        /// Rights held by the requesting user. May be repeated.
        #[arg(long = "right")]
        rights: Vec<String>,

        /// Request wall-clock budget, in seconds.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Pattern inputs as a JSON object, e.g. `'{"symbol": "AAPL"}'`.
        #[arg(long)]
        inputs: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Pricing Pack Store operations (spec §4.1).
    #[command(subcommand)]
    Pricing(PricingCommands),
}

#[derive(Subcommand, Debug)]
enum PricingCommands {
    /// Insert a new, non-superseded pack for an as-of date.
    Create {
        asof: NaiveDate,
        /// Content hash of the underlying price/FX/corporate-action tables.
        #[arg(long)]
        hash: String,
        /// Source provider names. May be repeated.
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Issue a restated D{n+1} pack that supersedes an existing one.
    Supersede {
        old_pack_id: String,
        #[arg(long)]
        hash: String,
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long)]
        reason: String,
    },
    /// Show the terminal (non-superseded) pack for an as-of date.
    GetLatest { asof: NaiveDate },
    /// Depth-first walk of a pack's supersede chain.
    Chain { root_pack_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("qpr=debug")
    } else {
        EnvFilter::new("qpr=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = dispatch(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = qpr_config::load_config(cli.config.as_deref())?;
    qpr_config::apply_env_overrides(&mut config);
    for warning in qpr_config::validate_config(&config)? {
        tracing::warn!(%warning, "config warning");
    }

    let pattern_dir = config
        .pattern_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or(cli.pattern_dir);
    let rt = bootstrap::build(&config, &pattern_dir)?;

    match cli.command {
        Commands::ListPatterns { json } => commands::list_patterns(&rt, json),
        Commands::ListCapabilities { json } => commands::list_capabilities(&rt, json),
        Commands::ListAgents { json } => commands::list_agents(&rt, json),
        Commands::Validate { file } => commands::validate_file(&rt, &file),
        Commands::Route { query, threshold, json } => commands::route(&rt, &query, threshold, json),
        Commands::Run {
            pattern_id,
            user,
            portfolio,
            asof,
            pricing_pack,
            ledger_commit,
            rights,
            timeout_secs,
            inputs,
            json,
        } => {
            let asof_date = asof.unwrap_or_else(|| chrono::Utc::now().date_naive());
            commands::run(
                &rt,
                commands::RunArgs {
                    pattern_id: &pattern_id,
                    user_id: &user,
                    portfolio_id: &portfolio,
                    asof_date,
                    pricing_pack_id: pricing_pack,
                    ledger_commit_hash: ledger_commit,
                    rights,
                    timeout_secs,
                    inputs_json: inputs,
                    json,
                },
            )
            .await
        }
        Commands::Pricing(pricing_cmd) => match pricing_cmd {
            PricingCommands::Create { asof, hash, sources } => {
                commands::pricing_create(&rt, asof, sources, hash).await
            }
            PricingCommands::Supersede {
                old_pack_id,
                hash,
                sources,
                reason,
            } => commands::pricing_supersede(&rt, &old_pack_id, sources, hash, reason).await,
            PricingCommands::GetLatest { asof } => commands::pricing_get_latest(&rt, asof).await,
            PricingCommands::Chain { root_pack_id } => commands::pricing_chain(&rt, &root_pack_id).await,
        },
    }
}
