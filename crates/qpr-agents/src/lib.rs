// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concrete `Agent` implementations (spec §9 "illustrative agent variant
//! set"): deterministic, non-LLM bodies standing in for what production
//! agents would call out to, so patterns have real capabilities to bind
//! against end to end. Wiring these into a [`qpr_capability::CapabilityRegistry`]
//! is the caller's job (see `qpr-cli`/`qpr-daemon` process bootstrap).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alerts;
mod charts;
mod claude_agent;
mod financial_analyst;
mod macro_hound;
mod optimizer;
mod ratings;
mod reports;
mod util;

pub use alerts::AlertsAgent;
pub use charts::ChartsAgent;
pub use claude_agent::ClaudeAgent;
pub use financial_analyst::FinancialAnalyst;
pub use macro_hound::MacroHound;
pub use optimizer::OptimizerAgent;
pub use ratings::RatingsAgent;
pub use reports::ReportsAgent;

/// Register all eight concrete agents into a fresh registry. A convenience
/// for callers (the CLI, the daemon) that want the full illustrative
/// capability surface without hand-registering each agent.
pub fn register_all(
    registry: &mut qpr_capability::CapabilityRegistry,
) -> Result<(), qpr_capability::CapabilityCollision> {
    use std::sync::Arc;
    registry.register(Arc::new(FinancialAnalyst))?;
    registry.register(Arc::new(MacroHound))?;
    registry.register(Arc::new(RatingsAgent))?;
    registry.register(Arc::new(ClaudeAgent))?;
    registry.register(Arc::new(OptimizerAgent))?;
    registry.register(Arc::new(ChartsAgent))?;
    registry.register(Arc::new(ReportsAgent))?;
    registry.register(Arc::new(AlertsAgent))?;
    Ok(())
}
