// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ClaudeAgent`: `narrative.summarize`. Stands in for what would be an LLM
//! call in production; assembles a deterministic narrative string from
//! already-computed figures so patterns can exercise a "write-up" step
//! without a network dependency (spec §1 Non-goals exclude data
//! acquisition, and the same boundary applies here — no outbound call).

use async_trait::async_trait;
use qpr_capability::Agent;
use std::collections::BTreeMap;

use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

use crate::util::required_str;

const SUMMARIZE: &str = "narrative.summarize";

/// Assembles a plain-English sentence from a `headline` and an optional
/// sequence of `supporting_points`.
pub struct ClaudeAgent;

#[async_trait]
impl Agent for ClaudeAgent {
    fn name(&self) -> &str {
        "ClaudeAgent"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![SUMMARIZE.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            SUMMARIZE => {
                let headline = required_str(args, "headline")?;
                let points = match args.get("supporting_points") {
                    Some(Value::Sequence(items)) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>(),
                    _ => Vec::new(),
                };
                Ok(Value::from(render_summary(headline, &points)))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("ClaudeAgent has no method for '{other}'"),
            )),
        }
    }
}

fn render_summary(headline: &str, points: &[&str]) -> String {
    if points.is_empty() {
        return headline.to_string();
    }
    format!("{headline} {}", points.join("; "))
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
    fn headline_alone_passes_through() {
        assert_eq!(render_summary("Portfolio up 4% this quarter.", &[]), "Portfolio up 4% this quarter.");
    }

    #[test]
    fn supporting_points_are_appended() {
        let rendered = render_summary("Portfolio up 4% this quarter.", &["tech overweight drove gains", "drawdown under 5%"]);
        assert_eq!(rendered, "Portfolio up 4% this quarter. tech overweight drove gains; drawdown under 5%");
    }

    #[tokio::test]
    async fn invoke_requires_headline() {
        let agent = ClaudeAgent;
        let err = agent.invoke(SUMMARIZE, &ctx(), &Value::Mapping(BTreeMap::new())).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn invoke_unknown_capability_errors() {
        let agent = ClaudeAgent;
        let err = agent.invoke("narrative.bogus", &ctx(), &Value::Null).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownCapability);
    }
}
