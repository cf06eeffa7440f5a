// SPDX-License-Identifier: MIT OR Apache-2.0
//! Template Resolver (C3).
//!
//! Recognizes one syntax: `{{path}}` where `path` is a dotted sequence
//! beginning with `inputs`, `ctx`, `state`, or the name of a prior step.
//! Performs no expression evaluation — path lookup only.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeSet;

use qpr_core::Value;
use qpr_error::{ErrorKind, RuntimeError};

/// Paths that must not resolve to `null` (spec §4.2).
fn required_context_paths() -> BTreeSet<&'static str> {
    BTreeSet::from(["ctx.pricing_pack_id", "ctx.ledger_commit_hash"])
}

/// A single `{{path}}` reference found while scanning a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    /// Raw dotted path, e.g. `"ctx.pricing_pack_id"`.
    pub path: String,
}

/// Scan `raw` for `{{...}}` occurrences and return the dotted paths found,
/// in order of appearance. Whitespace inside braces is ignored (spec §4.2).
pub fn scan(raw: &str) -> Vec<TemplateRef> {
    let mut refs = Vec::new();
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if let Some(end) = raw[i + 2..].find("}}") {
                let inner = raw[i + 2..i + 2 + end].trim();
                refs.push(TemplateRef {
                    path: inner.to_string(),
                });
                i += 2 + end + 2;
                continue;
            }
        }
        i += 1;
    }
    refs
}

/// `true` if the entire string is exactly one `{{path}}` template with no
/// surrounding text — in that case the resolved value keeps its native
/// type (spec §4.2 "Non-string args").
pub fn is_whole_value_template(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        let inner = &trimmed[2..trimmed.len() - 2];
        if !inner.contains("}}") {
            return Some(inner.trim());
        }
    }
    None
}

/// Resolve a single dotted `path` against the root mapping
/// `{"inputs": ..., "ctx": ..., "state": ..., <step_name>: ...}`, per spec
/// §4.2. For step references, `state` doubles as the per-step lookup: a
/// bare `step_name.foo` path is resolved via `state[step_name].foo`.
///
/// Returns `Ok(Value::Null)` for any missing segment, except when `path`
/// is in the required-context set and resolves to `null`, in which case
/// this returns `Err(RequiredContextMissing)`.
pub fn resolve_path(root: &Value, path: &str) -> Result<Value, RuntimeError> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Ok(Value::Null);
    }

    let resolved = if segments[0] == "inputs" || segments[0] == "ctx" || segments[0] == "state" {
        root.walk_path(&segments)
    } else {
        // Bare step-name reference: {{step_name.field}} -> state[step_name].field
        let mut full = vec!["state"];
        full.extend(segments.iter());
        root.walk_path(&full)
    };

    if resolved.is_null() && required_context_paths().contains(path) {
        return Err(RuntimeError::new(
            ErrorKind::RequiredContextMissing,
            format!("required context path '{path}' resolved to null"),
        )
        .with_context("path", path));
    }

    Ok(resolved)
}

/// Resolve an entire arg value: if it's exactly one whole-value template,
/// return the resolved value with its native type; otherwise substitute
/// every `{{path}}` occurrence into the surrounding string, coercing each
/// to its string representation (spec §4.2).
pub fn resolve_arg(root: &Value, raw: &str) -> Result<Value, RuntimeError> {
    if let Some(path) = is_whole_value_template(raw) {
        return resolve_path(root, path);
    }

    let mut out = String::new();
    let mut rest = raw;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                match after.find("}}") {
                    None => {
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let path = after[..end].trim();
                        let resolved = resolve_path(root, path)?;
                        out.push_str(&resolved.to_string());
                        rest = &after[end + 2..];
                    }
                }
            }
        }
    }
    Ok(Value::String(out))
}

/// Build the template root mapping from inputs/ctx/state sub-maps, per
/// spec §4.2: `{"inputs": ..., "ctx": ..., "state": <execution state>}`.
pub fn build_root(inputs: Value, ctx: Value, state: Value) -> Value {
    Value::mapping([
        ("inputs".to_string(), inputs),
        ("ctx".to_string(), ctx),
        ("state".to_string(), state),
    ])
}
