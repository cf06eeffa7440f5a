// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability Registry (C4) and the Agent Contract (spec §6.3).
//!
//! Maps dotted capability identifiers (`namespace.operation`) to
//! `(agent, method)` bindings. Registration is static: each agent declares
//! its `capabilities()` once at construction and the registry introspects
//! it once at startup (spec §9 "decorator-driven capability registration").

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qpr_core::{RequestContext, Value};
use qpr_error::RuntimeError;

/// An agent: a stable name plus a method-per-capability invocation entry
/// point. Agents must never directly access the cache, the pattern store,
/// or other agents (spec §6.3) — all cross-agent collaboration goes
/// through the orchestrator or through another capability invocation
/// routed by the runtime.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable agent name, e.g. `"FinancialAnalyst"`.
    fn name(&self) -> &str;

    /// Capability identifiers this agent implements.
    fn capabilities(&self) -> Vec<String>;

    /// Whether `capability` requires `ctx.pricing_pack_id` to be resolvable
    /// before invocation (spec §4.4 step 3). Declared out-of-band per
    /// agent; defaults to `false`.
    fn requires_pricing_pack(&self, _capability: &str) -> bool {
        false
    }

    /// Invoke `capability` with the resolved args and request context.
    /// Returns the raw value the runtime wraps into a Step Result.
    async fn invoke(
        &self,
        capability: &str,
        ctx: &RequestContext,
        args: &Value,
    ) -> Result<Value, RuntimeError>;
}

/// A resolved `(capability_name, agent_name, agent)` triple (spec §3.1
/// "Capability Binding").
#[derive(Clone)]
pub struct Binding {
    /// Dotted capability identifier.
    pub capability_name: String,
    /// Owning agent's name.
    pub agent_name: String,
    /// Shared handle to the owning agent.
    pub agent: Arc<dyn Agent>,
}

/// Error raised when two agents attempt to register the same capability
/// name (spec §4.3 "fatal startup error naming both agents").
#[derive(Debug, thiserror::Error)]
#[error("capability '{capability}' already registered by '{existing_agent}', cannot register '{new_agent}'")]
pub struct CapabilityCollision {
    /// The colliding capability name.
    pub capability: String,
    /// Agent that first registered the capability.
    pub existing_agent: String,
    /// Agent that attempted to re-register it.
    pub new_agent: String,
}

/// Process-wide registry mapping capability names to bindings. Read-only
/// after startup; no locking is needed on the hot path (spec §5).
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    bindings: HashMap<String, Binding>,
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every capability an agent declares. Fatal (returns an
    /// error) on any name collision with a previously-registered agent.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), CapabilityCollision> {
        let agent_name = agent.name().to_string();
        for capability in agent.capabilities() {
            if let Some(existing) = self.bindings.get(&capability) {
                return Err(CapabilityCollision {
                    capability,
                    existing_agent: existing.agent_name.clone(),
                    new_agent: agent_name,
                });
            }
        }
        for capability in agent.capabilities() {
            self.bindings.insert(
                capability.clone(),
                Binding {
                    capability_name: capability,
                    agent_name: agent_name.clone(),
                    agent: agent.clone(),
                },
            );
        }
        self.agents.insert(agent_name, agent);
        Ok(())
    }

    /// Resolve a capability name to its binding.
    pub fn resolve(&self, capability_name: &str) -> Option<&Binding> {
        self.bindings.get(capability_name)
    }

    /// All registered capability identifiers, in sorted order.
    pub fn list_capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered agent names, in sorted order.
    pub fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered capability bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// `true` if no capabilities have been registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
