// SPDX-License-Identifier: MIT OR Apache-2.0
//! Small `Value` extraction helpers shared by the concrete agents. Kept
//! here rather than on `qpr_core::Value` itself since these coercions are
//! specific to how this crate's agents read their args, not part of the
//! Template Resolver's contract.

use qpr_core::Value;
use qpr_error::{ErrorKind, RuntimeError};

/// Extract a required f64 argument, failing with `InvalidInput` if absent
/// or not numeric.
pub fn required_f64(args: &Value, key: &str) -> Result<f64, RuntimeError> {
    args.get(key)
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .ok_or_else(|| {
            RuntimeError::new(ErrorKind::InvalidInput, format!("missing or non-numeric argument '{key}'"))
                .with_context("argument", key)
        })
}

/// Extract a required sequence of f64 values.
pub fn required_f64_sequence(args: &Value, key: &str) -> Result<Vec<f64>, RuntimeError> {
    match args.get(key) {
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|v| match v {
                Value::Number(n) => n.as_f64().ok_or_else(|| numeric_element_error(key)),
                _ => Err(numeric_element_error(key)),
            })
            .collect(),
        _ => Err(RuntimeError::new(
            ErrorKind::InvalidInput,
            format!("missing or non-sequence argument '{key}'"),
        )
        .with_context("argument", key)),
    }
}

fn numeric_element_error(key: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::InvalidInput, format!("non-numeric element in sequence argument '{key}'"))
        .with_context("argument", key)
}

/// Wrap an f64 result into a `Value::Number`, falling back to `0` for a
/// non-finite result (`NaN`/`inf`) rather than panicking — `serde_json`
/// has no wire representation for either.
pub fn f64_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(0.into()))
}

/// Extract a required string argument.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, RuntimeError> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        RuntimeError::new(ErrorKind::InvalidInput, format!("missing or non-string argument '{key}'"))
            .with_context("argument", key)
    })
}
