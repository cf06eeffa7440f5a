// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provenance Tracer (C9, spec §4.8): accumulates per-step metadata as the
//! orchestrator executes a pattern, then aggregates it into a
//! [`ProvenanceSummary`] for reproducibility audits and UI provenance
//! badges.
//!
//! The aggregation math itself lives in [`qpr_core::trace`] since it is a
//! pure function of a finished [`Trace`]; this crate is the mutable,
//! in-progress half: the thing the orchestrator actually calls into while
//! a request is running.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, NaiveDate, Utc};
pub use qpr_core::{ProvenanceSummary, StepResult, StepStatus, Trace, TraceEntry};

/// Accumulates trace entries for one in-flight request.
#[derive(Debug, Default)]
pub struct ProvenanceTracer {
    trace: Trace,
    pricing_pack_id: Option<String>,
    ledger_commit_hash: Option<String>,
}

/// An open span for one step, returned by [`ProvenanceTracer::start_step`].
/// Must be closed with exactly one of the `finish_*` methods.
pub struct StepSpan {
    step_name: String,
    capability: Option<String>,
    agent_name: Option<String>,
    started_at: DateTime<Utc>,
}

impl ProvenanceTracer {
    /// Construct a tracer for a request pinned to the given reproducibility
    /// context.
    pub fn new(pricing_pack_id: Option<String>, ledger_commit_hash: Option<String>) -> Self {
        Self {
            trace: Trace::new(),
            pricing_pack_id,
            ledger_commit_hash,
        }
    }

    /// Open a span for a step about to be invoked.
    pub fn start_step(
        &self,
        step_name: impl Into<String>,
        capability: Option<String>,
        agent_name: Option<String>,
    ) -> StepSpan {
        StepSpan {
            step_name: step_name.into(),
            capability,
            agent_name,
            started_at: Utc::now(),
        }
    }

    /// Close `span` with a successful (possibly cached) [`StepResult`].
    pub fn finish_ok(&mut self, span: StepSpan, result: &StepResult, status: StepStatus, attempts: u32) {
        debug_assert!(matches!(status, StepStatus::Ok | StepStatus::OkCached));
        self.trace.push(TraceEntry {
            step_name: span.step_name,
            capability: span.capability,
            agent_name: span.agent_name,
            started_at: span.started_at,
            ended_at: Utc::now(),
            status,
            source: Some(result.source.clone()),
            asof: Some(result.asof),
            ttl: Some(result.ttl),
            warnings: result.warnings.clone(),
            error: None,
            attempts,
        });
    }

    /// Close `span` as a step whose invocation failed but whose declared
    /// `fallback` value was substituted, so the pattern keeps running.
    pub fn finish_fallback(&mut self, span: StepSpan, result: &StepResult, error: impl Into<String>, attempts: u32) {
        self.trace.push(TraceEntry {
            step_name: span.step_name,
            capability: span.capability,
            agent_name: span.agent_name,
            started_at: span.started_at,
            ended_at: Utc::now(),
            status: StepStatus::Fallback,
            source: Some(result.source.clone()),
            asof: Some(result.asof),
            ttl: Some(result.ttl),
            warnings: result.warnings.clone(),
            error: Some(error.into()),
            attempts,
        });
    }

    /// Close `span` as skipped (its `condition` evaluated false).
    pub fn finish_skipped(&mut self, span: StepSpan) {
        self.trace.push(TraceEntry {
            step_name: span.step_name,
            capability: span.capability,
            agent_name: span.agent_name,
            started_at: span.started_at,
            ended_at: Utc::now(),
            status: StepStatus::Skipped,
            source: None,
            asof: None,
            ttl: None,
            warnings: Vec::new(),
            error: None,
            attempts: 0,
        });
    }

    /// Close `span` as a terminal failure with no fallback applied.
    pub fn finish_failed(&mut self, span: StepSpan, error: impl Into<String>, attempts: u32) {
        let message = error.into();
        tracing::warn!(target: "qpr.provenance", step = %span.step_name, error = %message, "step failed");
        self.trace.push(TraceEntry {
            step_name: span.step_name,
            capability: span.capability,
            agent_name: span.agent_name,
            started_at: span.started_at,
            ended_at: Utc::now(),
            status: StepStatus::Failed,
            source: None,
            asof: None,
            ttl: None,
            warnings: Vec::new(),
            error: Some(message),
            attempts,
        });
    }

    /// Close `span` as cancelled (deadline or cancellation token tripped
    /// while the invocation was in flight).
    pub fn finish_cancelled(&mut self, span: StepSpan) {
        self.trace.push(TraceEntry {
            step_name: span.step_name,
            capability: span.capability,
            agent_name: span.agent_name,
            started_at: span.started_at,
            ended_at: Utc::now(),
            status: StepStatus::Cancelled,
            source: None,
            asof: None,
            ttl: None,
            warnings: Vec::new(),
            error: None,
            attempts: 0,
        });
    }

    /// Borrow the trace accumulated so far.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Consume the tracer, producing the final trace and its aggregated
    /// summary evaluated at `now`.
    pub fn finish(self, now: DateTime<Utc>) -> (Trace, ProvenanceSummary) {
        let summary = ProvenanceSummary::from_trace(
            &self.trace,
            self.pricing_pack_id.clone(),
            self.ledger_commit_hash.clone(),
            now,
        );
        (self.trace, summary)
    }
}

/// Per-step staleness in seconds, evaluated at `now` (spec §4.8: "staleness
/// per step = now - step.asof").
pub fn step_staleness_seconds(asof: NaiveDate, now: DateTime<Utc>) -> i64 {
    let asof_start = asof.and_hms_opt(0, 0, 0).unwrap().and_utc();
    (now - asof_start).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qpr_core::Value;

    #[test]
    fn tracer_accumulates_ok_entries() {
        let mut tracer = ProvenanceTracer::new(Some("PP_2025-09-01".into()), Some("ledger_abc".into()));
        let span = tracer.start_step("twr", Some("metrics.compute_twr".into()), Some("FinancialAnalyst".into()));
        let result = StepResult::ok(Value::from("0.042"), "FinancialAnalyst:PP_2025-09-01", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(), 3600);
        tracer.finish_ok(span, &result, StepStatus::Ok, 1);

        assert_eq!(tracer.trace().entries.len(), 1);
        let (_, summary) = tracer.finish(Utc::now());
        assert_eq!(summary.pricing_pack_id, Some("PP_2025-09-01".to_string()));
        assert_eq!(summary.agents_used.len(), 1);
    }

    #[test]
    fn tracer_records_skipped_with_no_provenance() {
        let mut tracer = ProvenanceTracer::new(None, None);
        let span = tracer.start_step("optional_step", None, None);
        tracer.finish_skipped(span);
        assert_eq!(tracer.trace().entries[0].status, StepStatus::Skipped);
        assert!(tracer.trace().entries[0].source.is_none());
    }

    #[test]
    fn tracer_records_failed_with_error_message() {
        let mut tracer = ProvenanceTracer::new(None, None);
        let span = tracer.start_step("flaky", Some("macro.dalio_cycle_score".into()), Some("MacroHound".into()));
        tracer.finish_failed(span, "agent unreachable", 3);
        let entry = &tracer.trace().entries[0];
        assert_eq!(entry.status, StepStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("agent unreachable"));
        assert_eq!(entry.attempts, 3);
    }

    #[test]
    fn step_staleness_is_nonnegative_for_past_asof() {
        let asof = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let now = chrono::Utc.with_ymd_and_hms(2025, 9, 3, 0, 0, 0).unwrap();
        assert_eq!(step_staleness_seconds(asof, now), 2 * 86_400);
    }
}
