// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent Runtime and Pattern Orchestrator (C5/C7, spec §4.4, §4.6): the
//! two collaborators that actually execute a pattern once the Capability
//! Router has picked one and the Pattern Index has loaded it.
//!
//! [`agent_runtime::AgentRuntime`] owns circuit-breaking, retry, and
//! pricing-pack preconditions for a single capability invocation.
//! [`orchestrator::Orchestrator`] owns the pattern-level concerns built on
//! top of it: input validation, the rights check, step-DAG execution in
//! declaration order (with `parallel_group` batches run concurrently),
//! fingerprint-keyed caching, and fallback/optional handling.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent_runtime;
mod io;
mod orchestrator;
mod rights;

pub use agent_runtime::{AgentRuntime, InvocationFailure, InvocationSuccess};
pub use orchestrator::{ExecutionResult, Orchestrator, OrchestratorError};
pub use rights::{ContextRightsChecker, RightsChecker};
