// SPDX-License-Identifier: MIT OR Apache-2.0
//! `MacroHound`: a deterministic stand-in for a macro-regime classifier.

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

use crate::util::{f64_value, required_f64};

const DALIO_CYCLE_SCORE: &str = "macro.dalio_cycle_score";

/// Scores where a portfolio sits in the long-term debt cycle, using the
/// style popularized by Ray Dalio's "Principles for Navigating Big Debt
/// Crises": growth, inflation, and debt-to-GDP trend feed a single
/// normalized score in `[-1.0, 1.0]`, negative meaning deleveraging/
/// contractionary, positive meaning reflationary/expansionary.
pub struct MacroHound;

#[async_trait]
impl Agent for MacroHound {
    fn name(&self) -> &str {
        "MacroHound"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![DALIO_CYCLE_SCORE.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            DALIO_CYCLE_SCORE => {
                let growth = required_f64(args, "real_gdp_growth")?;
                let inflation = required_f64(args, "inflation_rate")?;
                let debt_to_gdp_delta = required_f64(args, "debt_to_gdp_delta")?;
                Ok(f64_value(dalio_cycle_score(growth, inflation, debt_to_gdp_delta)))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("MacroHound has no method for '{other}'"),
            )),
        }
    }
}

/// Equal-weighted, clamped blend of the three named inputs. The weighting
/// is illustrative, not a reproduction of any published model.
fn dalio_cycle_score(real_gdp_growth: f64, inflation_rate: f64, debt_to_gdp_delta: f64) -> f64 {
    let raw = (real_gdp_growth * 2.0) + (inflation_rate * -1.0) + (debt_to_gdp_delta * -3.0);
    raw.clamp(-1.0, 1.0)
}
