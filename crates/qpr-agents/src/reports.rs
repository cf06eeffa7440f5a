// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ReportsAgent`: `reports.assemble_section`. Joins a section heading with
//! an ordered list of body values already produced by earlier steps — the
//! final assembly stage a report-generating pattern funnels its prior steps
//! through.

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

use crate::util::required_str;

const ASSEMBLE_SECTION: &str = "reports.assemble_section";

/// Assembles a named report section from a heading and a sequence of body
/// values, rendering each to its `Display` form.
pub struct ReportsAgent;

#[async_trait]
impl Agent for ReportsAgent {
    fn name(&self) -> &str {
        "ReportsAgent"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![ASSEMBLE_SECTION.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            ASSEMBLE_SECTION => {
                let heading = required_str(args, "heading")?;
                let body = match args.get("body") {
                    Some(Value::Sequence(items)) => items.clone(),
                    Some(other) => vec![other.clone()],
                    None => Vec::new(),
                };
                Ok(Value::mapping([
                    ("heading".to_string(), Value::from(heading)),
                    (
                        "lines".to_string(),
                        Value::Sequence(body.iter().map(|v| Value::from(v.to_string())).collect()),
                    ),
                ]))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("ReportsAgent has no method for '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use qpr_core::RequestContextBuilder;

    fn ctx() -> RequestContext {
        RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()).build()
    }

    #[tokio::test]
    async fn assembles_heading_and_lines() {
        let agent = ReportsAgent;
        let args = Value::mapping([
            ("heading".to_string(), Value::from("Performance")),
            (
                "body".to_string(),
                Value::Sequence(vec![Value::from("up 4%"), Value::from("drawdown 3%")]),
            ),
        ]);
        let result = agent.invoke(ASSEMBLE_SECTION, &ctx(), &args).await.unwrap();
        assert_eq!(result.get("heading"), Some(&Value::from("Performance")));
        assert_eq!(
            result.get("lines"),
            Some(&Value::Sequence(vec![Value::from("up 4%"), Value::from("drawdown 3%")]))
        );
    }

    #[tokio::test]
    async fn missing_body_yields_empty_lines() {
        let agent = ReportsAgent;
        let args = Value::mapping([("heading".to_string(), Value::from("Summary"))]);
        let result = agent.invoke(ASSEMBLE_SECTION, &ctx(), &args).await.unwrap();
        assert_eq!(result.get("lines"), Some(&Value::Sequence(Vec::new())));
    }

    #[tokio::test]
    async fn invoke_unknown_capability_errors() {
        let agent = ReportsAgent;
        let err = agent.invoke("reports.bogus", &ctx(), &Value::Null).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownCapability);
    }
}
