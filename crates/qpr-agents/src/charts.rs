// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ChartsAgent`: `charts.render_spec`. Returns a chart specification
//! dictionary (series + chart kind), not rendered pixels — rendering is out
//! of scope.

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

use crate::util::{required_f64_sequence, required_str};

const RENDER_SPEC: &str = "charts.render_spec";

/// Builds a minimal line-chart specification from a named series.
pub struct ChartsAgent;

#[async_trait]
impl Agent for ChartsAgent {
    fn name(&self) -> &str {
        "ChartsAgent"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![RENDER_SPEC.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            RENDER_SPEC => {
                let title = required_str(args, "title")?;
                let series = required_f64_sequence(args, "series")?;
                Ok(render_chart_spec(title, &series))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("ChartsAgent has no method for '{other}'"),
            )),
        }
    }
}

fn render_chart_spec(title: &str, series: &[f64]) -> Value {
    Value::mapping([
        ("kind".to_string(), Value::from("line")),
        ("title".to_string(), Value::from(title)),
        (
            "series".to_string(),
            Value::Sequence(series.iter().copied().map(crate::util::f64_value).collect()),
        ),
        ("point_count".to_string(), Value::from(series.len() as i64)),
    ])
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
    fn spec_carries_title_and_point_count() {
        let spec = render_chart_spec("NAV", &[100.0, 101.0, 99.5]);
        assert_eq!(spec.get("kind"), Some(&Value::from("line")));
        assert_eq!(spec.get("title"), Some(&Value::from("NAV")));
        assert_eq!(spec.get("point_count"), Some(&Value::from(3i64)));
    }

    #[tokio::test]
    async fn invoke_unknown_capability_errors() {
        let agent = ChartsAgent;
        let err = agent.invoke("charts.bogus", &ctx(), &Value::Null).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownCapability);
    }
}
