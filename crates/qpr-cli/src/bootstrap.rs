// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide wiring shared by every subcommand: build the Capability
//! Registry, register the illustrative agent set, load the pattern
//! directory against it, and assemble the Orchestrator (spec §9 "Initialize
//! in a deterministic sequence: Pricing Pack Store → Capability Registry
//! (empty) → Agents → Pattern Loader → Execution Cache").

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use qpr_capability::CapabilityRegistry;
use qpr_config::RuntimeConfig;
use qpr_pattern::PatternStore;
use qpr_pricing::PricingPackStore;
use qpr_runtime::{AgentRuntime, ContextRightsChecker, Orchestrator};

/// Everything a subcommand needs to execute or introspect patterns.
pub struct Runtime {
    pub patterns: Arc<PatternStore>,
    pub registry: Arc<CapabilityRegistry>,
    pub pricing: PricingPackStore,
    pub orchestrator: Orchestrator,
}

/// Build the process-wide runtime from a resolved [`RuntimeConfig`].
///
/// Pricing Pack Store comes first since nothing else depends on it being
/// populated, Agents register into an empty registry, and only then does
/// the Pattern Loader validate pattern documents against the now-complete
/// capability surface.
pub fn build(config: &RuntimeConfig, pattern_dir: &Path) -> Result<Runtime> {
    let pricing = PricingPackStore::new();

    let mut registry = CapabilityRegistry::new();
    qpr_agents::register_all(&mut registry).context("register built-in agents")?;
    let registry = Arc::new(registry);

    let patterns = PatternStore::load(pattern_dir, &registry)
        .with_context(|| format!("load patterns from {}", pattern_dir.display()))?;
    let patterns = Arc::new(patterns);

    let cache = Arc::new(qpr_cache::ExecutionCache::new(config.cache_max_entries));
    let agent_runtime = Arc::new(AgentRuntime::with_policy(
        registry.clone(),
        config.circuit_breaker.to_config(),
        config.retry.to_policy(),
    ));

    let orchestrator = Orchestrator::new(
        patterns.clone(),
        agent_runtime,
        cache,
        pricing.clone(),
        Arc::new(ContextRightsChecker),
    );

    Ok(Runtime {
        patterns,
        registry,
        pricing,
        orchestrator,
    })
}
