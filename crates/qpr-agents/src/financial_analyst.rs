// SPDX-License-Identifier: MIT OR Apache-2.0
//! `FinancialAnalyst`: time-weighted return and drawdown computation.

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::RuntimeError;

use crate::util::required_f64_sequence;

const COMPUTE_TWR: &str = "metrics.compute_twr";
const COMPUTE_DRAWDOWN: &str = "metrics.compute_drawdown";

/// Computes standard portfolio performance metrics against a pinned
/// pricing pack.
pub struct FinancialAnalyst;

#[async_trait]
impl Agent for FinancialAnalyst {
    fn name(&self) -> &str {
        "FinancialAnalyst"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![COMPUTE_TWR.to_string(), COMPUTE_DRAWDOWN.to_string()]
    }

    fn requires_pricing_pack(&self, _capability: &str) -> bool {
        true
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            COMPUTE_TWR => {
                let period_returns = required_f64_sequence(args, "period_returns")?;
                Ok(crate::util::f64_value(compute_twr(&period_returns)))
            }
            COMPUTE_DRAWDOWN => {
                let prices = required_f64_sequence(args, "prices")?;
                Ok(crate::util::f64_value(compute_max_drawdown(&prices)))
            }
            other => Err(unknown_capability(other)),
        }
    }
}

fn unknown_capability(capability: &str) -> RuntimeError {
    RuntimeError::new(
        qpr_error::ErrorKind::UnknownCapability,
        format!("FinancialAnalyst has no method for '{capability}'"),
    )
}

/// Geometric-linked time-weighted return across sub-period returns.
fn compute_twr(period_returns: &[f64]) -> f64 {
    period_returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Maximum peak-to-trough decline across a price series, expressed as a
/// positive fraction (0.25 == a 25% drawdown).
fn compute_max_drawdown(prices: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_drawdown = 0.0;
    for &price in prices {
        if price > peak {
            peak = price;
        }
        if peak > 0.0 {
            let drawdown = (peak - price) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }
    max_drawdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use qpr_core::RequestContextBuilder;

    fn ctx() -> RequestContext {
        RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())
            .pricing_pack_id("PP_2025-09-01")
            .build()
    }

    #[test]
    fn twr_links_positive_returns() {
        let twr = compute_twr(&[0.05, 0.02, -0.01]);
        assert!((twr - 0.06049).abs() < 1e-4);
    }

    #[test]
    fn twr_of_empty_series_is_zero() {
        assert_eq!(compute_twr(&[]), 0.0);
    }

    #[test]
    fn drawdown_finds_peak_to_trough() {
        let dd = compute_max_drawdown(&[100.0, 120.0, 90.0, 110.0]);
        assert!((dd - 0.25).abs() < 1e-9);
    }

    #[test]
    fn drawdown_of_monotonic_series_is_zero() {
        assert_eq!(compute_max_drawdown(&[100.0, 110.0, 120.0]), 0.0);
    }

    #[tokio::test]
    async fn invoke_compute_twr_through_agent() {
        let agent = FinancialAnalyst;
        let args = Value::mapping([(
            "period_returns".to_string(),
            Value::Sequence(vec![Value::from(0i64)]),
        )]);
        // period_returns must be floats; exercise the error path for ints.
        let err = agent.invoke(COMPUTE_TWR, &ctx(), &args).await.unwrap_err();
        assert_eq!(err.kind, qpr_error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn invoke_unknown_capability_errors() {
        let agent = FinancialAnalyst;
        let err = agent.invoke("metrics.bogus", &ctx(), &Value::Null).await.unwrap_err();
        assert_eq!(err.kind, qpr_error::ErrorKind::UnknownCapability);
    }

    #[test]
    fn requires_pricing_pack_for_all_capabilities() {
        let agent = FinancialAnalyst;
        assert!(agent.requires_pricing_pack(COMPUTE_TWR));
        assert!(agent.requires_pricing_pack(COMPUTE_DRAWDOWN));
    }
}
