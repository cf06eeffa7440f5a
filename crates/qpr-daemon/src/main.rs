// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use qpr_daemon::{build_app, bootstrap, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qpr-daemon", version, about = "Pattern-orchestrated analytics runtime daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8089")]
    bind: String,

    /// Directory the Pattern Loader scans for `*.json` pattern documents.
    #[arg(long, default_value = "patterns")]
    pattern_dir: PathBuf,

    /// Path to a `qpr.toml` runtime config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("qpr=debug")
    } else {
        EnvFilter::new("qpr=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = qpr_config::load_config(args.config.as_deref())?;
    qpr_config::apply_env_overrides(&mut config);
    for warning in qpr_config::validate_config(&config)? {
        tracing::warn!(%warning, "config warning");
    }

    let pattern_dir = config
        .pattern_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or(args.pattern_dir);

    let runtime = Arc::new(bootstrap::build(&config, &pattern_dir)?);
    let state = Arc::new(AppState::new(runtime, pattern_dir, config));

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "qpr-daemon listening");

    axum::serve(listener, app).await.context("serve")
}
