// SPDX-License-Identifier: MIT OR Apache-2.0
//! Input validation/coercion and output projection (spec §4.6 steps 1 and
//! 6). Kept apart from the step-execution loop since both are pure
//! functions of already-resolved data.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};
use qpr_pattern::{InputType, Pattern};
use qpr_template::resolve_arg;
use uuid::Uuid;

/// Validate a caller-supplied input mapping against `pattern.inputs`,
/// applying defaults and coercing each value to its declared type.
/// Fails with `InvalidInput` on the first violation found, in declaration
/// order.
pub fn validate_and_coerce_inputs(pattern: &Pattern, raw: &Value) -> Result<Value, RuntimeError> {
    let mut out = BTreeMap::new();
    for spec in &pattern.inputs {
        let present = raw.get(&spec.name);
        let value = match present {
            Some(v) => v.clone(),
            None => match &spec.default {
                Some(default) => Value::from(default.clone()),
                None => {
                    if spec.required {
                        return Err(RuntimeError::new(
                            ErrorKind::InvalidInput,
                            format!("missing required input '{}'", spec.name),
                        )
                        .with_context("input", spec.name.clone()));
                    }
                    Value::Null
                }
            },
        };

        if value.is_null() && !spec.required {
            out.insert(spec.name.clone(), Value::Null);
            continue;
        }

        let coerced = coerce_input(&spec.name, spec.input_type, spec.enum_values.as_deref(), value)?;
        out.insert(spec.name.clone(), coerced);
    }
    Ok(Value::Mapping(out))
}

fn coerce_input(name: &str, input_type: InputType, enum_values: Option<&[String]>, value: Value) -> Result<Value, RuntimeError> {
    let type_error = || {
        RuntimeError::new(ErrorKind::InvalidInput, format!("input '{name}' does not match declared type {input_type:?}"))
            .with_context("input", name)
    };

    match input_type {
        InputType::String => match value {
            Value::String(_) => Ok(value),
            _ => Err(type_error()),
        },
        InputType::Integer => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            _ => Err(type_error()),
        },
        InputType::Decimal => match &value {
            Value::Number(n) if n.as_f64().is_some() => Ok(value),
            _ => Err(type_error()),
        },
        InputType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            _ => Err(type_error()),
        },
        InputType::Date => match value.as_str() {
            Some(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Ok(value),
            _ => Err(type_error()),
        },
        InputType::Uuid => match value.as_str() {
            Some(s) if Uuid::parse_str(s).is_ok() => Ok(value),
            _ => Err(type_error()),
        },
        InputType::Enum => match value.as_str() {
            Some(s) if enum_values.map(|allowed| allowed.iter().any(|a| a == s)).unwrap_or(false) => Ok(value),
            _ => Err(type_error()),
        },
    }
}

/// Project `ctx` into the template root's `ctx` sub-mapping (spec §4.2).
pub fn ctx_to_value(ctx: &RequestContext) -> Value {
    let mut map = BTreeMap::new();
    map.insert("request_id".to_string(), Value::from(ctx.request_id.to_string()));
    map.insert("user_id".to_string(), Value::from(ctx.user_id.clone()));
    map.insert("portfolio_id".to_string(), Value::from(ctx.portfolio_id.clone()));
    map.insert("asof_date".to_string(), Value::from(ctx.asof_date.format("%Y-%m-%d").to_string()));
    map.insert(
        "pricing_pack_id".to_string(),
        ctx.pricing_pack_id.clone().map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "ledger_commit_hash".to_string(),
        ctx.ledger_commit_hash.clone().map(Value::from).unwrap_or(Value::Null),
    );
    map.insert("correlation_id".to_string(), Value::from(ctx.correlation_id.clone()));
    Value::Mapping(map)
}

/// Recursively resolve a raw pattern-document JSON value (a step's `args`
/// entry) against the template root, substituting `{{path}}` occurrences.
/// A bare string is resolved as a single template argument (spec §4.2);
/// arrays and objects recurse so templates can appear at any leaf.
pub fn resolve_json_value(root: &Value, raw: &serde_json::Value) -> Result<Value, RuntimeError> {
    match raw {
        serde_json::Value::String(s) => resolve_arg(root, s),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_json_value(root, item)?);
            }
            Ok(Value::Sequence(out))
        }
        serde_json::Value::Object(fields) => {
            let mut out = BTreeMap::new();
            for (k, v) in fields {
                out.insert(k.clone(), resolve_json_value(root, v)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(Value::from(other.clone())),
    }
}

/// Project the final execution state into the pattern's declared outputs.
/// A template that would otherwise fail with `RequiredContextMissing` is
/// downgraded to `null` here: required-context enforcement guards step
/// arguments, not the read-only output projection (spec §4.6 step 6).
pub fn project_outputs(root: &Value, outputs: &BTreeMap<String, String>) -> Value {
    let mut out = BTreeMap::new();
    for (name, template) in outputs {
        let value = resolve_arg(root, template).unwrap_or(Value::Null);
        out.insert(name.clone(), value);
    }
    Value::Mapping(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use qpr_core::RequestContextBuilder;
    use qpr_pattern::InputSpec;

    fn pattern_with_inputs(inputs: Vec<InputSpec>) -> Pattern {
        Pattern {
            id: "p".into(),
            version: "1.0.0".into(),
            category: None,
            tags: Vec::new(),
            description: String::new(),
            inputs,
            outputs: BTreeMap::new(),
            steps: Vec::new(),
            rights_required: Vec::new(),
            display: None,
            fallbacks: BTreeMap::new(),
        }
    }

    #[test]
    fn missing_required_input_fails() {
        let pattern = pattern_with_inputs(vec![InputSpec {
            name: "portfolio_id".into(),
            input_type: InputType::String,
            required: true,
            default: None,
            enum_values: None,
        }]);
        let err = validate_and_coerce_inputs(&pattern, &Value::Mapping(BTreeMap::new())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_optional_uses_default() {
        let pattern = pattern_with_inputs(vec![InputSpec {
            name: "lookback_days".into(),
            input_type: InputType::Integer,
            required: false,
            default: Some(serde_json::json!(30)),
            enum_values: None,
        }]);
        let out = validate_and_coerce_inputs(&pattern, &Value::Mapping(BTreeMap::new())).unwrap();
        assert_eq!(out.get("lookback_days"), Some(&Value::from(30i64)));
    }

    #[test]
    fn type_mismatch_rejected() {
        let pattern = pattern_with_inputs(vec![InputSpec {
            name: "as_of".into(),
            input_type: InputType::Date,
            required: true,
            default: None,
            enum_values: None,
        }]);
        let raw = Value::mapping([("as_of".to_string(), Value::from("not-a-date"))]);
        let err = validate_and_coerce_inputs(&pattern, &raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn enum_rejects_value_outside_allowed_set() {
        let pattern = pattern_with_inputs(vec![InputSpec {
            name: "period".into(),
            input_type: InputType::Enum,
            required: true,
            default: None,
            enum_values: Some(vec!["1Y".into(), "3Y".into()]),
        }]);
        let raw = Value::mapping([("period".to_string(), Value::from("10Y"))]);
        assert!(validate_and_coerce_inputs(&pattern, &raw).is_err());
    }

    #[test]
    fn ctx_to_value_projects_pricing_pack_as_null_when_unresolved() {
        let ctx = RequestContextBuilder::new("alice", "p1", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()).build();
        let v = ctx_to_value(&ctx);
        assert_eq!(v.get("pricing_pack_id"), Some(&Value::Null));
    }

    #[test]
    fn resolve_json_value_recurses_into_nested_structures() {
        let root = qpr_template::build_root(
            Value::mapping([("x".to_string(), Value::from("hi"))]),
            Value::Null,
            Value::Null,
        );
        let raw = serde_json::json!({"a": "{{inputs.x}}", "b": [1, "{{inputs.x}}"]});
        let resolved = resolve_json_value(&root, &raw).unwrap();
        assert_eq!(resolved.get("a"), Some(&Value::from("hi")));
    }

    #[test]
    fn project_outputs_downgrades_required_context_miss_to_null() {
        let root = qpr_template::build_root(
            Value::Null,
            Value::mapping([("ledger_commit_hash".to_string(), Value::Null)]),
            Value::Null,
        );
        let mut outputs = BTreeMap::new();
        outputs.insert("commit".to_string(), "{{ctx.ledger_commit_hash}}".to_string());
        let projected = project_outputs(&root, &outputs);
        assert_eq!(projected.get("commit"), Some(&Value::Null));
    }
}
