// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subcommand bodies. Kept apart from argument parsing (`main.rs`) so each
//! can be exercised directly from integration tests without going through
//! `clap`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use qpr_core::{RequestContextBuilder, Value};
use qpr_router::KeywordRouter;

use crate::bootstrap::Runtime;

/// `qpr list-patterns`: id, description, category, tags, declared inputs.
pub fn list_patterns(rt: &Runtime, json: bool) -> Result<()> {
    let mut rows = Vec::new();
    for id in rt.patterns.list_ids() {
        let loaded = rt.patterns.by_id(&id).expect("id came from list_ids");
        rows.push(serde_json::json!({
            "id": loaded.pattern.id,
            "version": loaded.pattern.version,
            "description": loaded.pattern.description,
            "category": loaded.pattern.category,
            "tags": loaded.pattern.tags,
            "inputs": loaded.pattern.inputs,
        }));
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!("{} ({})  {}", row["id"], row["version"], row["description"]);
        }
    }
    Ok(())
}

/// `qpr list-capabilities`.
pub fn list_capabilities(rt: &Runtime, json: bool) -> Result<()> {
    let caps = rt.registry.list_capabilities();
    if json {
        println!("{}", serde_json::to_string_pretty(&caps)?);
    } else {
        for cap in caps {
            println!("{cap}");
        }
    }
    Ok(())
}

/// `qpr list-agents`.
pub fn list_agents(rt: &Runtime, json: bool) -> Result<()> {
    let agents = rt.registry.list_agents();
    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
    } else {
        for agent in agents {
            println!("{agent}");
        }
    }
    Ok(())
}

/// `qpr route <query>`: natural-language query to pattern id (spec §4.9).
pub fn route(rt: &Runtime, query: &str, threshold: f64, json: bool) -> Result<()> {
    let index = rt.patterns.route_index();
    let router = KeywordRouter::new(threshold);
    match router.route(&index, query) {
        Ok(m) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&m)?);
            } else {
                println!("{} (score {:.3})", m.pattern_id, m.score);
            }
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

/// Arguments for `qpr run`, collected here so `main.rs` stays a thin parser.
pub struct RunArgs<'a> {
    pub pattern_id: &'a str,
    pub user_id: &'a str,
    pub portfolio_id: &'a str,
    pub asof_date: NaiveDate,
    pub pricing_pack_id: Option<String>,
    pub ledger_commit_hash: Option<String>,
    pub rights: Vec<String>,
    pub timeout_secs: u64,
    pub inputs_json: Option<String>,
    pub json: bool,
}

/// `qpr run`: execute one pattern end to end (spec §6.1 `execute_pattern`).
pub async fn run(rt: &Runtime, args: RunArgs<'_>) -> Result<()> {
    let inputs: Value = match args.inputs_json {
        Some(raw) => {
            let parsed: serde_json::Value =
                serde_json::from_str(&raw).context("parse --inputs as JSON")?;
            Value::from(parsed)
        }
        None => Value::mapping([]),
    };

    let mut builder = RequestContextBuilder::new(args.user_id, args.portfolio_id, args.asof_date)
        .timeout(Duration::from_secs(args.timeout_secs))
        .rights(args.rights);
    if let Some(pack) = args.pricing_pack_id {
        builder = builder.pricing_pack_id(pack);
    }
    if let Some(commit) = args.ledger_commit_hash {
        builder = builder.ledger_commit_hash(commit);
    }
    let ctx = builder.build();

    match rt.orchestrator.execute(args.pattern_id, inputs, &ctx).await {
        Ok(result) => {
            if args.json {
                let body = serde_json::json!({
                    "outputs": result.outputs,
                    "trace": result.trace,
                    "provenance": result.provenance,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("outputs: {}", serde_json::to_string_pretty(&serde_json::Value::from(result.outputs))?);
                println!("sources: {:?}", result.provenance.sources);
                println!("oldest_asof: {:?}", result.provenance.oldest_asof);
                println!("staleness_seconds: {}", result.provenance.overall_staleness_seconds);
            }
            Ok(())
        }
        Err(err) => {
            if args.json {
                let dto = qpr_error::RuntimeErrorDto::from(&err.error);
                let body = serde_json::json!({ "error": dto, "trace": err.trace });
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
            anyhow::bail!("{}", err.error)
        }
    }
}

/// `qpr pricing create`: insert a non-superseded pack for `asof_date`.
pub async fn pricing_create(rt: &Runtime, asof_date: NaiveDate, sources: Vec<String>, hash: String) -> Result<()> {
    let pack = rt
        .pricing
        .create_pack(asof_date, sources.into_iter().collect(), hash)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&pack)?);
    Ok(())
}

/// `qpr pricing supersede`: issue a restated D{n+1} pack.
pub async fn pricing_supersede(
    rt: &Runtime,
    old_pack_id: &str,
    sources: Vec<String>,
    hash: String,
    reason: String,
) -> Result<()> {
    let (old, new) = rt
        .pricing
        .supersede(old_pack_id, sources.into_iter().collect(), hash, reason)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({"old": old, "new": new}))?);
    Ok(())
}

/// `qpr pricing get-latest`: terminal pack for an as-of date.
pub async fn pricing_get_latest(rt: &Runtime, asof_date: NaiveDate) -> Result<()> {
    let pack = rt.pricing.get_latest(asof_date).await.map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&pack)?);
    Ok(())
}

/// `qpr pricing chain`: depth-first walk of the supersede chain.
pub async fn pricing_chain(rt: &Runtime, root_pack_id: &str) -> Result<()> {
    let chain = rt.pricing.list_chain(root_pack_id).await.map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&chain)?);
    Ok(())
}

/// `qpr validate <pattern-file>`: validate a single pattern document against
/// the currently-registered capabilities without adding it to the index.
pub fn validate_file(rt: &Runtime, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let pattern: qpr_pattern::Pattern =
        serde_json::from_str(&content).with_context(|| format!("parse {} as a pattern document", path.display()))?;
    qpr_pattern::validate(&pattern, &rt.registry).map_err(|errors| anyhow::anyhow!("{errors:?}"))?;
    println!("valid");
    Ok(())
}
