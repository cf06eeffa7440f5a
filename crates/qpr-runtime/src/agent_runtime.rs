// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent Runtime (C5, spec §4.4): the only entity that ever invokes an
//! agent method. Resolves the capability, consults the circuit breaker,
//! checks the pricing-pack precondition, retries transient failures, and
//! wraps the raw return value into a [`StepResult`] with provenance
//! metadata attached.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use qpr_capability::CapabilityRegistry;
use qpr_core::{RequestContext, StepResult, Value};
use qpr_error::{ErrorKind, RuntimeError};
use qpr_retry::{retry_async, AllowDecision, BreakerConfig, BreakerRegistry, RetryPolicy};

/// A successful invocation plus the attempt count the orchestrator records
/// in the step's trace entry.
#[derive(Debug)]
pub struct InvocationSuccess {
    /// The wrapped result.
    pub result: StepResult,
    /// Total attempts made before success.
    pub attempts: u32,
}

/// Everything the orchestrator needs back from one invocation attempt that
/// isn't already captured in the [`StepResult`] itself.
#[derive(Debug)]
pub struct InvocationFailure {
    /// The classified failure.
    pub error: RuntimeError,
    /// Agent that was invoked, if capability resolution succeeded.
    pub agent_name: Option<String>,
    /// Total attempts made, including the failing one.
    pub attempts: u32,
}

/// Routes capability invocations through circuit-breaking and retry policy
/// (spec §4.4, §4.4.1, §4.4.2).
pub struct AgentRuntime {
    registry: Arc<CapabilityRegistry>,
    breakers: BreakerRegistry,
    retry_policy: RetryPolicy,
}

impl AgentRuntime {
    /// Construct a runtime with default breaker and retry policy (spec
    /// defaults: N=20, F=0.5, M=5, cooldown 30s→10min; 3 attempts, base
    /// 250ms, cap 5s).
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self::with_policy(registry, BreakerConfig::default(), RetryPolicy::default())
    }

    /// Construct a runtime with explicit breaker/retry configuration.
    pub fn with_policy(registry: Arc<CapabilityRegistry>, breaker_config: BreakerConfig, retry_policy: RetryPolicy) -> Self {
        Self {
            registry,
            breakers: BreakerRegistry::new(breaker_config),
            retry_policy,
        }
    }

    /// Resolve the agent name that would serve `capability`, without
    /// invoking it. Used by the orchestrator to populate a trace entry's
    /// `agent_name` before the invocation even starts.
    pub fn resolve_agent_name(&self, capability: &str) -> Option<String> {
        self.registry.resolve(capability).map(|b| b.agent_name.clone())
    }

    /// Execute the six-step invocation sequence from spec §4.4.
    ///
    /// `remaining_budget` bounds both the per-attempt timeout and the
    /// retry policy's "don't retry past the deadline" rule;
    /// `default_ttl` seeds the result's `ttl` metadata field when the
    /// agent does not supply an `_metadata.ttl` override.
    pub async fn invoke(
        &self,
        capability: &str,
        ctx: &RequestContext,
        args: &Value,
        remaining_budget: Duration,
        default_ttl: u64,
    ) -> Result<InvocationSuccess, InvocationFailure> {
        let binding = self.registry.resolve(capability).ok_or_else(|| InvocationFailure {
            error: RuntimeError::new(ErrorKind::UnknownCapability, format!("no agent registered for capability '{capability}'"))
                .with_context("capability", capability),
            agent_name: None,
            attempts: 0,
        })?;
        let agent = binding.agent.clone();
        let agent_name = binding.agent_name.clone();

        let breaker = self.breakers.get_or_create(&agent_name, capability).await;
        let decision = breaker.allow().await;
        if decision == AllowDecision::Reject {
            tracing::debug!(target: "qpr.runtime", agent = %agent_name, capability, "circuit open, rejecting");
            return Err(InvocationFailure {
                error: RuntimeError::new(ErrorKind::CircuitOpen, format!("circuit open for '{agent_name}'::'{capability}'"))
                    .with_context("agent", agent_name.clone())
                    .with_context("capability", capability),
                agent_name: Some(agent_name),
                attempts: 0,
            });
        }

        if agent.requires_pricing_pack(capability) {
            match &ctx.pricing_pack_id {
                Some(id) if qpr_pricing::validate_pack_id(id).is_ok() => {}
                _ => {
                    return Err(InvocationFailure {
                        error: RuntimeError::new(
                            ErrorKind::MissingPricingPack,
                            format!("capability '{capability}' requires a resolvable pricing pack"),
                        )
                        .with_context("agent", agent_name.clone())
                        .with_context("capability", capability),
                        agent_name: Some(agent_name),
                        attempts: 0,
                    });
                }
            }
        }

        let per_attempt_timeout = ctx.timeout.min(remaining_budget).max(Duration::from_millis(1));
        let outcome = retry_async(
            &self.retry_policy,
            remaining_budget,
            || {
                let agent = agent.clone();
                let capability = capability.to_string();
                let ctx = ctx.clone();
                let args = args.clone();
                async move {
                    match tokio::time::timeout(per_attempt_timeout, agent.invoke(&capability, &ctx, &args)).await {
                        Ok(result) => result,
                        Err(_) => Err(RuntimeError::new(
                            ErrorKind::AgentTransientFailure,
                            format!("capability '{capability}' timed out after {per_attempt_timeout:?}"),
                        )),
                    }
                }
            },
            |err: &RuntimeError| err.kind.is_transient(),
        )
        .await;

        match outcome {
            Ok(ok) => {
                if decision != AllowDecision::Reject {
                    breaker.record_success().await;
                }
                let result = Self::wrap_result(ok.value, &agent_name, ctx, default_ttl);
                Ok(InvocationSuccess {
                    result,
                    attempts: ok.metadata.total_attempts,
                })
            }
            Err((err, metadata)) => {
                if err.kind.is_transient() {
                    breaker.record_failure().await;
                }
                tracing::debug!(
                    target: "qpr.runtime",
                    agent = %agent_name,
                    capability,
                    attempts = metadata.total_attempts,
                    error = %err,
                    "invocation failed"
                );
                Err(InvocationFailure {
                    error: err,
                    agent_name: Some(agent_name),
                    attempts: metadata.total_attempts,
                })
            }
        }
    }

    /// Wrap an agent's raw return value into a [`StepResult`], applying
    /// the `_metadata` override convention (spec §4.4 step 5).
    fn wrap_result(raw: Value, agent_name: &str, ctx: &RequestContext, default_ttl: u64) -> StepResult {
        let default_source = format!("{agent_name}:{}", ctx.pricing_pack_id.as_deref().unwrap_or("none"));

        let (value, overrides) = match raw {
            Value::Mapping(mut map) => {
                let overrides = map.remove("_metadata");
                (Value::Mapping(map), overrides)
            }
            other => (other, None),
        };

        let mut result = StepResult::ok(value, default_source, ctx.asof_date, default_ttl);

        if let Some(Value::Mapping(meta)) = overrides {
            if let Some(source) = meta.get("source").and_then(Value::as_str) {
                result.source = source.to_string();
            }
            if let Some(asof_str) = meta.get("asof").and_then(Value::as_str) {
                if let Ok(asof) = NaiveDate::parse_from_str(asof_str, "%Y-%m-%d") {
                    result.asof = asof;
                }
            }
            if let Some(ttl) = meta.get("ttl").and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                _ => None,
            }) {
                result.ttl = ttl;
            }
            if let Some(confidence) = meta.get("confidence").and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                _ => None,
            }) {
                result.confidence = Some(confidence);
            }
            if let Some(Value::Sequence(items)) = meta.get("warnings") {
                result.warnings = items.iter().filter_map(Value::as_str).map(str::to_string).collect();
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use qpr_core::RequestContextBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoAgent;

    #[async_trait]
    impl qpr_capability::Agent for EchoAgent {
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

    struct FlakyAgent {
        calls: AtomicU32,
        fail_until: u32,
    }

    #[async_trait]
    impl qpr_capability::Agent for FlakyAgent {
        fn name(&self) -> &str {
            "FlakyAgent"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["flaky.fetch".to_string()]
        }
        async fn invoke(&self, _c: &str, _ctx: &RequestContext, _args: &Value) -> Result<Value, RuntimeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_until {
                Err(RuntimeError::new(ErrorKind::AgentTransientFailure, "not yet"))
            } else {
                Ok(Value::mapping([("ok".to_string(), Value::from(true))]))
            }
        }
    }

    struct RequiresPackAgent;

    #[async_trait]
    impl qpr_capability::Agent for RequiresPackAgent {
        fn name(&self) -> &str {
            "RequiresPackAgent"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["pack.needed".to_string()]
        }
        fn requires_pricing_pack(&self, _capability: &str) -> bool {
            true
        }
        async fn invoke(&self, _c: &str, _ctx: &RequestContext, _args: &Value) -> Result<Value, RuntimeError> {
            Ok(Value::Null)
        }
    }

    fn ctx() -> RequestContext {
        RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())
            .pricing_pack_id("PP_2025-09-01")
            .build()
    }

    fn registry_with(agent: Arc<dyn qpr_capability::Agent>) -> Arc<CapabilityRegistry> {
        let mut r = CapabilityRegistry::new();
        r.register(agent).unwrap();
        Arc::new(r)
    }

    #[tokio::test]
    async fn successful_invocation_attaches_default_metadata() {
        let runtime = AgentRuntime::new(registry_with(Arc::new(EchoAgent)));
        let result = runtime
            .invoke("test.echo", &ctx(), &Value::from("hello"), Duration::from_secs(5), 3600)
            .await
            .unwrap();
        assert_eq!(result.result.value, Value::from("hello"));
        assert_eq!(result.result.source, "EchoAgent:PP_2025-09-01");
        assert_eq!(result.result.ttl, 3600);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn unknown_capability_fails_without_invoking() {
        let runtime = AgentRuntime::new(registry_with(Arc::new(EchoAgent)));
        let err = runtime
            .invoke("no.such", &ctx(), &Value::Null, Duration::from_secs(5), 0)
            .await
            .unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::UnknownCapability);
        assert_eq!(err.attempts, 0);
    }

    #[tokio::test]
    async fn missing_pricing_pack_for_agent_that_requires_it() {
        let runtime = AgentRuntime::new(registry_with(Arc::new(RequiresPackAgent)));
        let ctx = RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()).build();
        let err = runtime
            .invoke("pack.needed", &ctx, &Value::Null, Duration::from_secs(5), 0)
            .await
            .unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::MissingPricingPack);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let agent = Arc::new(FlakyAgent {
            calls: AtomicU32::new(0),
            fail_until: 2,
        });
        let runtime = AgentRuntime::new(registry_with(agent));
        let result = runtime
            .invoke("flaky.fetch", &ctx(), &Value::Null, Duration::from_secs(5), 0)
            .await
            .unwrap();
        assert_eq!(result.result.value, Value::mapping([("ok".to_string(), Value::from(true))]));
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_transient_failure() {
        let agent = Arc::new(FlakyAgent {
            calls: AtomicU32::new(0),
            fail_until: 10,
        });
        let runtime = AgentRuntime::new(registry_with(agent));
        let err = runtime
            .invoke("flaky.fetch", &ctx(), &Value::Null, Duration::from_secs(5), 0)
            .await
            .unwrap_err();
        assert_eq!(err.error.kind, ErrorKind::AgentTransientFailure);
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test]
    async fn metadata_override_replaces_defaults() {
        struct MetaAgent;
        #[async_trait]
        impl qpr_capability::Agent for MetaAgent {
            fn name(&self) -> &str {
                "MetaAgent"
            }
            fn capabilities(&self) -> Vec<String> {
                vec!["meta.test".to_string()]
            }
            async fn invoke(&self, _c: &str, _ctx: &RequestContext, _args: &Value) -> Result<Value, RuntimeError> {
                Ok(Value::mapping([
                    ("v".to_string(), Value::from(1i64)),
                    (
                        "_metadata".to_string(),
                        Value::mapping([
                            ("source".to_string(), Value::from("custom:source")),
                            ("ttl".to_string(), Value::from(60i64)),
                            ("confidence".to_string(), Value::Number(serde_json::Number::from_f64(0.9).unwrap())),
                        ]),
                    ),
                ]))
            }
        }

        let runtime = AgentRuntime::new(registry_with(Arc::new(MetaAgent)));
        let result = runtime
            .invoke("meta.test", &ctx(), &Value::Null, Duration::from_secs(5), 3600)
            .await
            .unwrap();
        assert_eq!(result.result.source, "custom:source");
        assert_eq!(result.result.ttl, 60);
        assert_eq!(result.result.confidence, Some(0.9));
        assert!(result.result.value.get("_metadata").is_none());
    }
}
