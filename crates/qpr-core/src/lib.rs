// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Stable contract types shared across the pattern-orchestrated analytics
//! runtime: the dynamic [`Value`] type, [`RequestContext`], and the
//! execution [`Trace`]/[`ProvenanceSummary`] pair, plus canonical hashing
//! used for both the execution-cache fingerprint and pricing-pack content
//! hashes.

mod context;
mod hash;
mod trace;
mod value;

pub use context::{CancellationToken, RequestContext, RequestContextBuilder, RequestContextOverrides};
pub use hash::{canonical_json, content_hash, sha256_hex, HashError};
pub use trace::{ProvenanceSummary, StepResult, StepStatus, Trace, TraceEntry};
pub use value::Value;
