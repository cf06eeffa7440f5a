// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rights check (spec §4.6 step 2): an externally-owned authorization
//! collaborator, consulted once per request before any step runs.

use qpr_core::RequestContext;

/// Decides whether a request holds the rights a pattern requires.
///
/// Kept as a trait rather than a concrete type so a deployment can swap in
/// an external authorization service without touching the orchestrator.
pub trait RightsChecker: Send + Sync {
    /// Returns `true` if `ctx` satisfies every entry in `required`.
    fn has_rights(&self, ctx: &RequestContext, required: &[String]) -> bool;
}

/// Default checker: the rights a pattern requires must all appear in
/// `ctx.rights`, as asserted by whatever authenticated the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextRightsChecker;

impl RightsChecker for ContextRightsChecker {
    fn has_rights(&self, ctx: &RequestContext, required: &[String]) -> bool {
        required.iter().all(|r| ctx.rights.iter().any(|held| held == r))
    }
}
