// SPDX-License-Identifier: MIT OR Apache-2.0
//! `OptimizerAgent`: `portfolio.optimize_weights`. A deterministic
//! inverse-volatility allocator, not a full mean-variance optimizer —
//! illustrative of the capability contract, not a production allocation
//! engine (portfolio construction is out of scope per the broader
//! specification; this just gives patterns a real `optimize_weights` step
//! to bind against).

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

use crate::util::{f64_value, required_f64_sequence};

const OPTIMIZE_WEIGHTS: &str = "portfolio.optimize_weights";

/// Allocates weights inversely proportional to each asset's volatility,
/// normalized to sum to 1.0.
pub struct OptimizerAgent;

#[async_trait]
impl Agent for OptimizerAgent {
    fn name(&self) -> &str {
        "OptimizerAgent"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![OPTIMIZE_WEIGHTS.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            OPTIMIZE_WEIGHTS => {
                let volatilities = required_f64_sequence(args, "volatilities")?;
                let weights = inverse_volatility_weights(&volatilities).map_err(|msg| {
                    RuntimeError::new(ErrorKind::InvalidInput, msg).with_context("argument", "volatilities")
                })?;
                Ok(Value::Sequence(weights.into_iter().map(f64_value).collect()))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("OptimizerAgent has no method for '{other}'"),
            )),
        }
    }
}

/// Returns an error if `volatilities` is empty or any entry is non-positive
/// — inverse weighting is undefined for a zero or negative volatility.
fn inverse_volatility_weights(volatilities: &[f64]) -> Result<Vec<f64>, String> {
    if volatilities.is_empty() {
        return Err("volatilities must be non-empty".to_string());
    }
    if volatilities.iter().any(|v| *v <= 0.0) {
        return Err("volatilities must all be positive".to_string());
    }
    let inverses: Vec<f64> = volatilities.iter().map(|v| 1.0 / v).collect();
    let total: f64 = inverses.iter().sum();
    Ok(inverses.into_iter().map(|inv| inv / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use qpr_core::RequestContextBuilder;

    fn ctx() -> RequestContext {
        RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()).build()
    }

    #[test]
    fn equal_volatility_yields_equal_weights() {
        let weights = inverse_volatility_weights(&[0.1, 0.1, 0.1]).unwrap();
        for w in weights {
            assert!((w - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let weights = inverse_volatility_weights(&[0.05, 0.1, 0.2]).unwrap();
        let total: f64 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lower_volatility_gets_larger_weight() {
        let weights = inverse_volatility_weights(&[0.05, 0.2]).unwrap();
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn empty_series_is_rejected() {
        assert!(inverse_volatility_weights(&[]).is_err());
    }

    #[test]
    fn nonpositive_volatility_is_rejected() {
        assert!(inverse_volatility_weights(&[0.1, 0.0]).is_err());
    }

    #[tokio::test]
    async fn invoke_unknown_capability_errors() {
        let agent = OptimizerAgent;
        let err = agent.invoke("portfolio.bogus", &ctx(), &Value::Null).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownCapability);
    }
}
