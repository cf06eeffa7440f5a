// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the pattern-orchestrated analytics runtime.
//!
//! Every error raised anywhere in the runtime carries a stable [`ErrorKind`]
//! tag, a human-readable message, an optional cause chain, and arbitrary
//! key-value context. Use the builder returned by [`RuntimeError::new`] to
//! construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable, machine-readable error kind. Mutually exclusive by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Pattern input validation failed.
    InvalidInput,
    /// Rights check failed.
    AccessDenied,
    /// Pricing pack required but not resolvable.
    MissingPricingPack,
    /// Mandatory template path resolved to null.
    RequiredContextMissing,
    /// Capability name not in registry.
    UnknownCapability,
    /// Pattern id not loaded.
    UnknownPattern,
    /// Natural-language router found no pattern above threshold.
    UnresolvedIntent,
    /// Agent circuit breaker rejected the call.
    CircuitOpen,
    /// Agent raised a transient error after all retries exhausted.
    AgentTransientFailure,
    /// Agent raised a non-retriable error.
    AgentPermanentFailure,
    /// Request wall-clock budget exceeded.
    DeadlineExceeded,
    /// Cancellation token tripped.
    ExecutionCancelled,
    /// A pack or input failed a post-hoc invariant.
    ValidationFailure,
    /// System overloaded; retry later.
    Backpressure,
}

impl ErrorKind {
    /// Whether this kind surfaces immediately at request entry, before any
    /// step executes (propagation policy, spec §7).
    pub fn surfaces_immediately(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput
                | Self::AccessDenied
                | Self::UnknownPattern
                | Self::UnknownCapability
                | Self::MissingPricingPack
                | Self::RequiredContextMissing
                | Self::UnresolvedIntent
                | Self::Backpressure
        )
    }

    /// Whether this kind is routed through a step's fallback mechanism
    /// before halting the pattern.
    pub fn routes_through_fallback(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen | Self::AgentTransientFailure | Self::AgentPermanentFailure
        )
    }

    /// Whether this kind halts the pattern but preserves completed steps'
    /// trace entries (not their outputs).
    pub fn halts_preserving_trace(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::ExecutionCancelled)
    }

    /// Whether a failure of this kind should feed the per-agent circuit
    /// breaker (transient classification, spec §4.4.1).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AgentTransientFailure | Self::CircuitOpen)
    }

    /// Stable `&'static str` wire representation (e.g. `"INVALID_INPUT"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::MissingPricingPack => "MISSING_PRICING_PACK",
            Self::RequiredContextMissing => "REQUIRED_CONTEXT_MISSING",
            Self::UnknownCapability => "UNKNOWN_CAPABILITY",
            Self::UnknownPattern => "UNKNOWN_PATTERN",
            Self::UnresolvedIntent => "UNRESOLVED_INTENT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::AgentTransientFailure => "AGENT_TRANSIENT_FAILURE",
            Self::AgentPermanentFailure => "AGENT_PERMANENT_FAILURE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::ExecutionCancelled => "EXECUTION_CANCELLED",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::Backpressure => "BACKPRESSURE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuntimeError
// ---------------------------------------------------------------------------

/// Unified runtime error.
///
/// Carries a stable [`ErrorKind`], a human-readable message, an optional
/// source error for cause-chaining, and structured diagnostic context. Per
/// spec §7, the offending pattern id and step name (when relevant) belong in
/// `context`, not in ad hoc fields, so every error kind shares one shape.
///
/// ```
/// use qpr_error::{RuntimeError, ErrorKind};
///
/// let err = RuntimeError::new(ErrorKind::MissingPricingPack, "no pack resolvable")
///     .with_context("asof_date", "2025-09-01");
/// ```
pub struct RuntimeError {
    /// Machine-readable error kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics (pattern id, step name,
    /// correlation id, and the like).
    pub context: BTreeMap<String, serde_json::Value>,
}

impl RuntimeError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for attaching `pattern_id` context.
    pub fn in_pattern(self, pattern_id: impl Into<String>) -> Self {
        self.with_context("pattern_id", pattern_id.into())
    }

    /// Shorthand for attaching `step_name` context.
    pub fn in_step(self, step_name: impl Into<String>) -> Self {
        self.with_context("step_name", step_name.into())
    }

    /// Shorthand for attaching the request correlation id.
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_context("correlation_id", correlation_id.into())
    }
}

impl fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RuntimeError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support (wire DTO, never exposes stack traces per spec §7)
// ---------------------------------------------------------------------------

/// Serialisable, externally-safe snapshot of a [`RuntimeError`].
///
/// Never carries the opaque `source` chain or any stack-trace detail; only
/// `source_message`, a plain string, crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeErrorDto {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&RuntimeError> for RuntimeErrorDto {
    fn from(err: &RuntimeError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<RuntimeErrorDto> for RuntimeError {
    fn from(dto: RuntimeErrorDto) -> Self {
        Self {
            kind: dto.kind,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

/// Convenience `Result` alias used across the runtime's internal crates.
pub type Result<T> = std::result::Result<T, RuntimeError>;
