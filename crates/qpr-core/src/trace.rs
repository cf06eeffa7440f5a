// SPDX-License-Identifier: MIT OR Apache-2.0
//! Step Result, Trace, and provenance aggregation (spec §3.1, §4.8).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::value::Value;

/// A result value plus the metadata the Agent Runtime attaches to every
/// invocation (spec §3.1 "Step Result"). Metadata is attached by the
/// runtime, never authored directly by an agent, except where an agent
/// supplies an `_metadata` override (spec §4.4 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// The agent's return value, stored opaquely.
    pub value: Value,
    /// Provider/pack identifying string, e.g. `"FinancialAnalyst:PP_2025-09-01"`.
    pub source: String,
    /// As-of date this result is valid for.
    pub asof: NaiveDate,
    /// Cache lifetime in seconds; `0` means never cache.
    pub ttl: u64,
    /// Optional confidence score in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Non-fatal warnings surfaced alongside the result.
    pub warnings: Vec<String>,
    /// Present only when the step failed.
    pub error: Option<String>,
}

impl StepResult {
    /// Construct a successful result with no warnings.
    pub fn ok(value: Value, source: impl Into<String>, asof: NaiveDate, ttl: u64) -> Self {
        Self {
            value,
            source: source.into(),
            asof,
            ttl,
            confidence: None,
            warnings: Vec::new(),
            error: None,
        }
    }
}

/// Status of one executed (or skipped, or failed) step (spec §3.1 "Trace").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step ran and succeeded.
    Ok,
    /// Step's result was served from the Execution Cache.
    OkCached,
    /// Step's `condition` evaluated false.
    Skipped,
    /// Step failed and no fallback was available (or it was `optional`).
    Failed,
    /// Step failed and its declared `fallback` value was used instead.
    Fallback,
    /// Step was in flight when cancellation or a deadline tripped.
    Cancelled,
}

/// One entry in the execution trace: step name, capability, agent,
/// timing, status, provenance, and warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Step name, unique within the pattern.
    pub step_name: String,
    /// Capability identifier invoked (absent for purely-skipped steps with
    /// no capability resolution attempted).
    pub capability: Option<String>,
    /// Agent name that served the invocation, if any.
    pub agent_name: Option<String>,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end time.
    pub ended_at: DateTime<Utc>,
    /// Terminal status.
    pub status: StepStatus,
    /// Provenance fields, present for `Ok`/`OkCached`/`Fallback`.
    pub source: Option<String>,
    /// As-of date of the underlying data, if any.
    pub asof: Option<NaiveDate>,
    /// Declared cache TTL, if any.
    pub ttl: Option<u64>,
    /// Warnings recorded for this step.
    pub warnings: Vec<String>,
    /// Error message, present for `Failed`/`Fallback`.
    pub error: Option<String>,
    /// Number of invocation attempts made (retry policy, spec §4.4.2).
    pub attempts: u32,
}

/// Ordered sequence of [`TraceEntry`] values for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    /// Entries in step-declaration order.
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    /// Construct an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }
}

/// Aggregated provenance for a completed request (spec §4.8, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceSummary {
    /// Pricing pack the request resolved to.
    pub pricing_pack_id: Option<String>,
    /// Ledger commit hash observed.
    pub ledger_commit_hash: Option<String>,
    /// Deduplicated union of step sources.
    pub sources: BTreeSet<String>,
    /// Oldest `asof` date among executed steps.
    pub oldest_asof: Option<NaiveDate>,
    /// `now - oldest_asof` in seconds, the overall staleness.
    pub overall_staleness_seconds: i64,
    /// Distinct agent names invoked.
    pub agents_used: BTreeSet<String>,
    /// Distinct capability names invoked.
    pub capabilities_used: BTreeSet<String>,
}

impl ProvenanceSummary {
    /// Aggregate a trace into a summary, evaluated against `now`.
    ///
    /// `now` is threaded in explicitly (rather than read from the system
    /// clock here) so the aggregation itself stays a pure function, per the
    /// Template Resolver's "no global reads" discipline extended to
    /// provenance accounting (spec §8 invariant 4 in spirit).
    pub fn from_trace(
        trace: &Trace,
        pricing_pack_id: Option<String>,
        ledger_commit_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut sources = BTreeSet::new();
        let mut agents_used = BTreeSet::new();
        let mut capabilities_used = BTreeSet::new();
        let mut oldest_asof: Option<NaiveDate> = None;

        for entry in &trace.entries {
            if let Some(source) = &entry.source {
                sources.insert(source.clone());
            }
            if let Some(agent) = &entry.agent_name {
                agents_used.insert(agent.clone());
            }
            if let Some(capability) = &entry.capability {
                capabilities_used.insert(capability.clone());
            }
            if let Some(asof) = entry.asof {
                oldest_asof = Some(match oldest_asof {
                    Some(current) if current <= asof => current,
                    _ => asof,
                });
            }
        }

        let overall_staleness_seconds = oldest_asof
            .map(|asof| {
                let asof_start = asof.and_hms_opt(0, 0, 0).unwrap().and_utc();
                (now - asof_start).num_seconds().max(0)
            })
            .unwrap_or(0);

        Self {
            pricing_pack_id,
            ledger_commit_hash,
            sources,
            oldest_asof,
            overall_staleness_seconds,
            agents_used,
            capabilities_used,
        }
    }
}
