// SPDX-License-Identifier: MIT OR Apache-2.0
//! `AlertsAgent`: `alerts.evaluate_thresholds`. Compares named metrics
//! against caller-supplied thresholds and reports which ones breached.

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

const EVALUATE_THRESHOLDS: &str = "alerts.evaluate_thresholds";

/// Evaluates a `metrics` mapping against a `thresholds` mapping of the same
/// keys, flagging any metric whose absolute value exceeds its threshold.
pub struct AlertsAgent;

#[async_trait]
impl Agent for AlertsAgent {
    fn name(&self) -> &str {
        "AlertsAgent"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![EVALUATE_THRESHOLDS.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            EVALUATE_THRESHOLDS => {
                let metrics = mapping_arg(args, "metrics")?;
                let thresholds = mapping_arg(args, "thresholds")?;
                Ok(evaluate_thresholds(metrics, thresholds))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("AlertsAgent has no method for '{other}'"),
            )),
        }
    }
}

fn mapping_arg<'a>(
    args: &'a Value,
    key: &str,
) -> Result<&'a std::collections::BTreeMap<String, Value>, RuntimeError> {
    match args.get(key) {
        Some(Value::Mapping(m)) => Ok(m),
        _ => Err(RuntimeError::new(ErrorKind::InvalidInput, format!("missing or non-mapping argument '{key}'"))
            .with_context("argument", key)),
    }
}

/// For each metric with a matching threshold entry, breaches when
/// `|metric| > |threshold|`. Metrics with no declared threshold are
/// ignored rather than treated as a breach.
fn evaluate_thresholds(
    metrics: &std::collections::BTreeMap<String, Value>,
    thresholds: &std::collections::BTreeMap<String, Value>,
) -> Value {
    let mut breached = Vec::new();
    for (name, metric) in metrics {
        let (Some(metric), Some(threshold)) = (as_f64(metric), thresholds.get(name).and_then(as_f64)) else {
            continue;
        };
        if metric.abs() > threshold.abs() {
            breached.push(Value::from(name.as_str()));
        }
    }
    Value::mapping([
        ("breached".to_string(), Value::Sequence(breached.clone())),
        ("any_breached".to_string(), Value::from(!breached.is_empty())),
    ])
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
