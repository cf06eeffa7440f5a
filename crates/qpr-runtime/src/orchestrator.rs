// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern Orchestrator (C7, spec §4.6): runs a pattern's step DAG end to
//! end — input validation, rights check, per-batch step execution (serial
//! or concurrent within a `parallel_group`), fingerprint-keyed caching,
//! fallback/optional handling, and output projection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use qpr_cache::{fingerprint, CacheOutcome, ExecutionCache, FingerprintInputs};
use qpr_core::{RequestContext, StepResult, StepStatus, Trace, Value};
use qpr_error::{ErrorKind, RuntimeError};
use qpr_pattern::{Pattern, PatternStore, Step};
use qpr_pricing::PricingPackStore;
use qpr_provenance::{ProvenanceSummary, ProvenanceTracer, StepSpan};
use qpr_template::resolve_arg;

use crate::agent_runtime::AgentRuntime;
use crate::io;
use crate::rights::RightsChecker;

/// A pattern execution that halted before producing output. The partial
/// trace is preserved so a caller can still show what ran before the halt
/// (spec §4.6: `DeadlineExceeded`/`ExecutionCancelled` "halt preserving
/// trace"; other halting kinds preserve it too, just without the
/// not-yet-started steps).
#[derive(Debug)]
pub struct OrchestratorError {
    /// The error that halted execution.
    pub error: RuntimeError,
    /// Trace entries for every step that ran before the halt.
    pub trace: Trace,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The result of a completed pattern execution.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Projected output values, keyed by the pattern's declared output names.
    pub outputs: Value,
    /// Full per-step trace, in declaration order.
    pub trace: Trace,
    /// Aggregated provenance summary derived from the trace.
    pub provenance: ProvenanceSummary,
}

/// Executes patterns against the Pattern Index, Agent Runtime, Execution
/// Cache, and Pricing Pack Store it is constructed with.
pub struct Orchestrator {
    patterns: Arc<PatternStore>,
    agent_runtime: Arc<AgentRuntime>,
    cache: Arc<ExecutionCache>,
    pricing: PricingPackStore,
    rights_checker: Arc<dyn RightsChecker>,
}

impl Orchestrator {
    /// Wire together the collaborators a running orchestrator needs.
    pub fn new(
        patterns: Arc<PatternStore>,
        agent_runtime: Arc<AgentRuntime>,
        cache: Arc<ExecutionCache>,
        pricing: PricingPackStore,
        rights_checker: Arc<dyn RightsChecker>,
    ) -> Self {
        Self {
            patterns,
            agent_runtime,
            cache,
            pricing,
            rights_checker,
        }
    }

    /// Run `pattern_id` against `raw_inputs` under `ctx` (spec §4.6 steps
    /// 1-6).
    pub async fn execute(&self, pattern_id: &str, raw_inputs: Value, ctx: &RequestContext) -> Result<ExecutionResult, OrchestratorError> {
        let start = Instant::now();

        let loaded = self.patterns.by_id(pattern_id).ok_or_else(|| OrchestratorError {
            error: RuntimeError::new(ErrorKind::UnknownPattern, format!("no pattern loaded with id '{pattern_id}'"))
                .with_context("pattern_id", pattern_id),
            trace: Trace::new(),
        })?;
        let pattern = loaded.pattern.clone();

        if !self.rights_checker.has_rights(ctx, &pattern.rights_required) {
            return Err(OrchestratorError {
                error: RuntimeError::new(ErrorKind::AccessDenied, "caller lacks a right required by this pattern").in_pattern(pattern_id),
                trace: Trace::new(),
            });
        }

        let inputs = io::validate_and_coerce_inputs(&pattern, &raw_inputs).map_err(|error| OrchestratorError {
            error: error.in_pattern(pattern_id),
            trace: Trace::new(),
        })?;

        let effective_ctx = resolve_request_context(ctx, &self.pricing).await;
        let mut tracer = ProvenanceTracer::new(effective_ctx.pricing_pack_id.clone(), effective_ctx.ledger_commit_hash.clone());
        let mut state: BTreeMap<String, Value> = BTreeMap::new();

        for batch in step_batches(&pattern.steps) {
            let elapsed = start.elapsed();
            if effective_ctx.cancellation_token.is_cancelled() {
                return Err(self.halt_with(tracer, pattern_id, ErrorKind::ExecutionCancelled, "cancellation requested"));
            }
            if elapsed >= effective_ctx.timeout {
                return Err(self.halt_with(tracer, pattern_id, ErrorKind::DeadlineExceeded, "request deadline exceeded"));
            }
            let remaining_budget = effective_ctx.timeout.saturating_sub(elapsed);

            let root = qpr_template::build_root(inputs.clone(), io::ctx_to_value(&effective_ctx), Value::Mapping(state.clone()));

            let step_futures = batch.iter().map(|step| {
                execute_step(
                    &tracer,
                    &pattern,
                    step,
                    &root,
                    &effective_ctx,
                    &self.agent_runtime,
                    &self.cache,
                    &pattern.id,
                    &loaded.content_hash,
                    remaining_budget,
                )
            });
            let results = join_all(step_futures).await;

            // A cancellation that tripped while this batch's steps were in
            // flight must not let their results land in execution state or
            // their failures halt the pattern (spec §5: "drop their results
            // and record `cancelled` once they return"). Each step that
            // actually ran closes as `Cancelled` instead of its normal
            // outcome; a step already `Skipped` stays `Skipped`.
            let cancelled_mid_flight = effective_ctx.cancellation_token.is_cancelled();

            for outcome in results {
                match outcome {
                    StepOutcome::Skipped(span) => tracer.finish_skipped(span),
                    StepOutcome::Completed { span, .. } if cancelled_mid_flight => {
                        tracer.finish_cancelled(span);
                    }
                    StepOutcome::FailedOptional { span, .. } if cancelled_mid_flight => {
                        tracer.finish_cancelled(span);
                    }
                    StepOutcome::Halt { span, .. } if cancelled_mid_flight => {
                        tracer.finish_cancelled(span);
                    }
                    StepOutcome::Completed {
                        span,
                        status,
                        result,
                        attempts,
                        fallback_error,
                        state_key,
                    } => {
                        match status {
                            StepStatus::Fallback => {
                                tracer.finish_fallback(span, &result, fallback_error.unwrap_or_else(|| "invocation failed".to_string()), attempts);
                            }
                            other => tracer.finish_ok(span, &result, other, attempts),
                        }
                        state.insert(state_key, result.value);
                    }
                    StepOutcome::FailedOptional { span, error, attempts } => {
                        tracer.finish_failed(span, error.to_string(), attempts);
                    }
                    StepOutcome::Halt { span, error, attempts } => {
                        tracer.finish_failed(span, error.to_string(), attempts);
                        return Err(self.halt(tracer, pattern_id, error));
                    }
                }
            }

            if cancelled_mid_flight {
                return Err(self.halt_with(tracer, pattern_id, ErrorKind::ExecutionCancelled, "cancellation requested"));
            }
        }

        let root = qpr_template::build_root(inputs, io::ctx_to_value(&effective_ctx), Value::Mapping(state));
        let outputs = io::project_outputs(&root, &pattern.outputs);
        let (trace, provenance) = tracer.finish(Utc::now());
        Ok(ExecutionResult { outputs, trace, provenance })
    }

    fn halt_with(&self, tracer: ProvenanceTracer, pattern_id: &str, kind: ErrorKind, message: impl Into<String>) -> OrchestratorError {
        self.halt(tracer, pattern_id, RuntimeError::new(kind, message))
    }

    fn halt(&self, tracer: ProvenanceTracer, pattern_id: &str, error: RuntimeError) -> OrchestratorError {
        let (trace, _) = tracer.finish(Utc::now());
        OrchestratorError {
            error: error.in_pattern(pattern_id),
            trace,
        }
    }
}

/// Best-effort pricing pack resolution: a pattern whose steps don't
/// actually need a pack should not fail just because none resolves here
/// (spec §4.1: `None` means "resolve latest for asof_date"; the agent
/// runtime surfaces `MissingPricingPack` itself for capabilities that
/// require one).
async fn resolve_request_context(ctx: &RequestContext, pricing: &PricingPackStore) -> RequestContext {
    if ctx.pricing_pack_id.is_some() {
        return ctx.clone();
    }
    match pricing.get_latest(ctx.asof_date).await {
        Ok(pack) => {
            let mut resolved = ctx.clone();
            resolved.pricing_pack_id = Some(pack.id);
            resolved
        }
        Err(_) => ctx.clone(),
    }
}

/// Group steps into execution batches: a contiguous run of steps sharing
/// the same non-empty `parallel_group` tag executes concurrently; any
/// other step is its own single-step batch. A `parallel_group` tag that
/// reappears after a gap starts a new batch rather than rejoining the
/// earlier one (spec §5 treats this as implementation-defined; contiguous
/// grouping keeps declaration order meaningful).
fn step_batches(steps: &[Step]) -> Vec<Vec<&Step>> {
    let mut batches: Vec<Vec<&Step>> = Vec::new();
    for step in steps {
        let joins_last = match (&step.parallel_group, batches.last()) {
            (Some(tag), Some(last)) => last.first().and_then(|s| s.parallel_group.as_deref()) == Some(tag.as_str()),
            _ => false,
        };
        if joins_last {
            batches.last_mut().expect("checked Some above").push(step);
        } else {
            batches.push(vec![step]);
        }
    }
    batches
}

enum StepOutcome {
    Skipped(StepSpan),
    Completed {
        span: StepSpan,
        status: StepStatus,
        result: StepResult,
        attempts: u32,
        fallback_error: Option<String>,
        state_key: String,
    },
    FailedOptional {
        span: StepSpan,
        error: RuntimeError,
        attempts: u32,
    },
    Halt {
        span: StepSpan,
        error: RuntimeError,
        attempts: u32,
    },
}

/// Execute one step: condition check, arg resolution, cache consult,
/// invocation, and fallback/optional handling (spec §4.6 steps 3-5).
#[allow(clippy::too_many_arguments)]
async fn execute_step(
    tracer: &ProvenanceTracer,
    pattern: &Pattern,
    step: &Step,
    root: &Value,
    ctx: &RequestContext,
    agent_runtime: &AgentRuntime,
    cache: &ExecutionCache,
    pattern_id: &str,
    pattern_version: &str,
    remaining_budget: Duration,
) -> StepOutcome {
    let state_key = step.state_key().to_string();
    let agent_name = agent_runtime.resolve_agent_name(&step.capability);
    let span = tracer.start_step(step.name.clone(), Some(step.capability.clone()), agent_name);

    if let Some(condition) = &step.condition {
        match resolve_arg(root, condition) {
            Ok(value) if value.as_bool_strict().unwrap_or(false) => {}
            Ok(_) => return StepOutcome::Skipped(span),
            Err(error) => return StepOutcome::Halt { span, error, attempts: 0 },
        }
    }

    let mut resolved_args = BTreeMap::new();
    for (name, raw) in &step.args {
        match io::resolve_json_value(root, raw) {
            Ok(value) => {
                resolved_args.insert(name.clone(), value);
            }
            Err(error) => return StepOutcome::Halt { span, error, attempts: 0 },
        }
    }
    let args_value = Value::Mapping(resolved_args);
    let ttl = step.ttl.unwrap_or(0);

    let fingerprint_key = (ttl > 0)
        .then(|| {
            fingerprint(&FingerprintInputs {
                pattern_id,
                pattern_version,
                step_name: &step.name,
                capability: &step.capability,
                resolved_args: &args_value,
                pricing_pack_id: ctx.pricing_pack_id.as_deref(),
                ledger_commit_hash: ctx.ledger_commit_hash.as_deref(),
            })
            .ok()
        })
        .flatten();

    if let Some(key) = &fingerprint_key {
        if let (CacheOutcome::Hit, Some(cached)) = cache.get_with_outcome(key).await {
            if let Ok(result) = serde_json::from_value::<StepResult>(serde_json::Value::from(cached)) {
                return StepOutcome::Completed {
                    span,
                    status: StepStatus::OkCached,
                    result,
                    attempts: 0,
                    fallback_error: None,
                    state_key,
                };
            }
        }
    }

    match agent_runtime.invoke(&step.capability, ctx, &args_value, remaining_budget, ttl).await {
        Ok(success) => {
            if let Some(key) = fingerprint_key {
                if let Ok(json) = serde_json::to_value(&success.result) {
                    cache.put(key, Value::from(json), Duration::from_secs(ttl)).await;
                }
            }
            StepOutcome::Completed {
                span,
                status: StepStatus::Ok,
                result: success.result,
                attempts: success.attempts,
                fallback_error: None,
                state_key,
            }
        }
        Err(failure) => {
            if failure.error.kind.routes_through_fallback() {
                let fallback = step.fallback.clone().or_else(|| pattern.fallbacks.get(&step.name).cloned());
                if let Some(fallback_raw) = fallback {
                    let result = StepResult::ok(Value::from(fallback_raw), format!("fallback:{}", step.name), ctx.asof_date, 0);
                    return StepOutcome::Completed {
                        span,
                        status: StepStatus::Fallback,
                        result,
                        attempts: failure.attempts,
                        fallback_error: Some(failure.error.to_string()),
                        state_key,
                    };
                }
                if step.optional {
                    return StepOutcome::FailedOptional {
                        span,
                        error: failure.error,
                        attempts: failure.attempts,
                    };
                }
            }
            StepOutcome::Halt {
                span,
                error: failure.error,
                attempts: failure.attempts,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use qpr_capability::{Agent, CapabilityRegistry};
    use qpr_core::{CancellationToken, RequestContextBuilder};
    use qpr_retry::{BreakerConfig, RetryPolicy};
    use std::path::Path;
    use tempfile::tempdir;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "EchoAgent"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["test.echo".to_string()]
        }
        async fn invoke(&self, _c: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
            Ok(args.clone())
        }
    }

    struct AlwaysFailsAgent;

    #[async_trait]
    impl Agent for AlwaysFailsAgent {
        fn name(&self) -> &str {
            "AlwaysFailsAgent"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["test.fail".to_string()]
        }
        async fn invoke(&self, _c: &str, _ctx: &RequestContext, _args: &Value) -> Result<Value, RuntimeError> {
            Err(RuntimeError::new(ErrorKind::AgentTransientFailure, "down for maintenance"))
        }
    }

    struct DelayAgent {
        delay: Duration,
    }

    #[async_trait]
    impl Agent for DelayAgent {
        fn name(&self) -> &str {
            "DelayAgent"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["test.delay".to_string()]
        }
        async fn invoke(&self, _c: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
            tokio::time::sleep(self.delay).await;
            Ok(args.clone())
        }
    }

    fn write_pattern(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
    }

    fn registry() -> CapabilityRegistry {
        let mut r = CapabilityRegistry::new();
        r.register(Arc::new(EchoAgent)).unwrap();
        r.register(Arc::new(AlwaysFailsAgent)).unwrap();
        r.register(Arc::new(DelayAgent { delay: Duration::from_millis(150) })).unwrap();
        r
    }

    fn build_orchestrator(dir: &Path) -> (Orchestrator, Arc<CapabilityRegistry>) {
        let registry = Arc::new(registry());
        let patterns = Arc::new(PatternStore::load(dir, &registry).unwrap());
        let agent_runtime = Arc::new(AgentRuntime::with_policy(registry.clone(), BreakerConfig::default(), RetryPolicy { max_attempts: 1, ..RetryPolicy::default() }));
        let cache = Arc::new(ExecutionCache::new(100));
        let orchestrator = Orchestrator::new(patterns, agent_runtime, cache, PricingPackStore::new(), Arc::new(crate::rights::ContextRightsChecker));
        (orchestrator, registry)
    }

    fn ctx() -> RequestContext {
        RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())
            .pricing_pack_id("PP_2025-09-01")
            .build()
    }

    #[tokio::test]
    async fn executes_single_step_pattern_and_projects_output() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "echo_once",
            r#"{
                "id": "echo_once",
                "version": "1.0.0",
                "description": "echoes",
                "inputs": [{"name": "x", "type": "string", "required": true}],
                "outputs": {"result": "{{s1.v}}"},
                "steps": [{"name": "s1", "capability": "test.echo", "args": {"v": "{{inputs.x}}"}}]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let inputs = Value::mapping([("x".to_string(), Value::from("hello"))]);
        let result = orchestrator.execute("echo_once", inputs, &ctx()).await.unwrap();
        assert_eq!(result.outputs.get("result"), Some(&Value::from("hello")));
        assert_eq!(result.trace.entries.len(), 1);
        assert_eq!(result.trace.entries[0].status, StepStatus::Ok);
    }

    #[tokio::test]
    async fn unknown_pattern_id_fails_before_any_step_runs() {
        let dir = tempdir().unwrap();
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let err = orchestrator.execute("missing", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::UnknownPattern);
        assert!(err.trace.entries.is_empty());
    }

    #[tokio::test]
    async fn missing_required_right_is_denied() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "gated",
            r#"{
                "id": "gated",
                "version": "1.0.0",
                "description": "needs a right",
                "inputs": [],
                "outputs": {},
                "rights_required": ["reports.read"],
                "steps": []
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let err = orchestrator.execute("gated", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn false_condition_skips_step_and_leaves_state_empty() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "conditional",
            r#"{
                "id": "conditional",
                "version": "1.0.0",
                "description": "skips a step",
                "inputs": [{"name": "go", "type": "boolean", "required": true}],
                "outputs": {},
                "steps": [{"name": "s1", "capability": "test.echo", "args": {"v": "x"}, "condition": "{{inputs.go}}"}]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let inputs = Value::mapping([("go".to_string(), Value::from(false))]);
        let result = orchestrator.execute("conditional", inputs, &ctx()).await.unwrap();
        assert_eq!(result.trace.entries[0].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn fallback_value_is_used_on_transient_failure() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "falls_back",
            r#"{
                "id": "falls_back",
                "version": "1.0.0",
                "description": "falls back on failure",
                "inputs": [],
                "outputs": {"result": "{{s1.v}}"},
                "steps": [{"name": "s1", "capability": "test.fail", "args": {}, "fallback": {"v": "default"}}]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let result = orchestrator.execute("falls_back", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert_eq!(result.outputs.get("result"), Some(&Value::from("default")));
        assert_eq!(result.trace.entries[0].status, StepStatus::Fallback);
    }

    #[tokio::test]
    async fn optional_step_without_fallback_records_failure_and_continues() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "optional_step",
            r#"{
                "id": "optional_step",
                "version": "1.0.0",
                "description": "optional failure",
                "inputs": [],
                "outputs": {},
                "steps": [
                    {"name": "s1", "capability": "test.fail", "args": {}, "optional": true},
                    {"name": "s2", "capability": "test.echo", "args": {"v": "still runs"}}
                ]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let result = orchestrator.execute("optional_step", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert_eq!(result.trace.entries[0].status, StepStatus::Failed);
        assert_eq!(result.trace.entries[1].status, StepStatus::Ok);
    }

    #[tokio::test]
    async fn non_optional_failure_with_no_fallback_halts_the_pattern() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "halts",
            r#"{
                "id": "halts",
                "version": "1.0.0",
                "description": "halts on failure",
                "inputs": [],
                "outputs": {},
                "steps": [
                    {"name": "s1", "capability": "test.fail", "args": {}},
                    {"name": "s2", "capability": "test.echo", "args": {"v": "never runs"}}
                ]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let err = orchestrator.execute("halts", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::AgentTransientFailure);
        assert_eq!(err.trace.entries.len(), 1);
    }

    #[tokio::test]
    async fn parallel_group_runs_concurrently_and_both_land_in_state() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "parallel",
            r#"{
                "id": "parallel",
                "version": "1.0.0",
                "description": "two concurrent steps",
                "inputs": [],
                "outputs": {"a": "{{s1.v}}", "b": "{{s2.v}}"},
                "steps": [
                    {"name": "s1", "capability": "test.echo", "args": {"v": "one"}, "parallel_group": "g"},
                    {"name": "s2", "capability": "test.echo", "args": {"v": "two"}, "parallel_group": "g"}
                ]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let result = orchestrator.execute("parallel", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert_eq!(result.outputs.get("a"), Some(&Value::from("one")));
        assert_eq!(result.outputs.get("b"), Some(&Value::from("two")));
        assert_eq!(result.trace.entries.len(), 2);
    }

    #[tokio::test]
    async fn second_execution_of_a_cached_step_is_served_from_cache() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "cached",
            r#"{
                "id": "cached",
                "version": "1.0.0",
                "description": "cacheable step",
                "inputs": [],
                "outputs": {"result": "{{s1.v}}"},
                "steps": [{"name": "s1", "capability": "test.echo", "args": {"v": "stable"}, "ttl": 3600}]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let first = orchestrator.execute("cached", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert_eq!(first.trace.entries[0].status, StepStatus::Ok);
        let second = orchestrator.execute("cached", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert_eq!(second.trace.entries[0].status, StepStatus::OkCached);
    }

    #[tokio::test]
    async fn zero_step_pattern_produces_empty_outputs() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "empty",
            r#"{
                "id": "empty",
                "version": "1.0.0",
                "description": "no steps",
                "inputs": [],
                "outputs": {},
                "steps": []
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let result = orchestrator.execute("empty", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert!(result.trace.entries.is_empty());
    }

    #[tokio::test]
    async fn required_context_missing_downgrades_to_null_at_output_stage() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "needs_ledger",
            r#"{
                "id": "needs_ledger",
                "version": "1.0.0",
                "description": "output references ledger commit hash",
                "inputs": [],
                "outputs": {"commit": "{{ctx.ledger_commit_hash}}"},
                "steps": []
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());
        let result = orchestrator.execute("needs_ledger", Value::Mapping(BTreeMap::new()), &ctx()).await.unwrap();
        assert_eq!(result.outputs.get("commit"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn cancellation_mid_flight_drops_result_and_records_cancelled() {
        let dir = tempdir().unwrap();
        write_pattern(
            dir.path(),
            "delayed",
            r#"{
                "id": "delayed",
                "version": "1.0.0",
                "description": "one slow step",
                "inputs": [],
                "outputs": {"result": "{{s1.v}}"},
                "steps": [{"name": "s1", "capability": "test.delay", "args": {"v": "late"}}]
            }"#,
        );
        let (orchestrator, _registry) = build_orchestrator(dir.path());

        let token = CancellationToken::new();
        let ctx = RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())
            .pricing_pack_id("PP_2025-09-01")
            .timeout(Duration::from_secs(5))
            .cancellation_token(token.clone())
            .build();

        let cancel_token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel_token.cancel();
        });

        let err = orchestrator.execute("delayed", Value::Mapping(BTreeMap::new()), &ctx).await.unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::ExecutionCancelled);
        assert_eq!(err.trace.entries.len(), 1);
        assert_eq!(err.trace.entries[0].status, StepStatus::Cancelled);
    }

    #[test]
    fn step_batches_groups_contiguous_parallel_tags_only() {
        let steps = vec![
            Step {
                name: "a".into(),
                capability: "test.echo".into(),
                args: BTreeMap::new(),
                save_as: None,
                condition: None,
                fallback: None,
                ttl: None,
                parallel_group: Some("g".into()),
                optional: false,
            },
            Step {
                name: "b".into(),
                capability: "test.echo".into(),
                args: BTreeMap::new(),
                save_as: None,
                condition: None,
                fallback: None,
                ttl: None,
                parallel_group: Some("g".into()),
                optional: false,
            },
            Step {
                name: "c".into(),
                capability: "test.echo".into(),
                args: BTreeMap::new(),
                save_as: None,
                condition: None,
                fallback: None,
                ttl: None,
                parallel_group: None,
                optional: false,
            },
            Step {
                name: "d".into(),
                capability: "test.echo".into(),
                args: BTreeMap::new(),
                save_as: None,
                condition: None,
                fallback: None,
                ttl: None,
                parallel_group: Some("g".into()),
                optional: false,
            },
        ];
        let batches = step_batches(&steps);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[2].len(), 1);
    }
}
