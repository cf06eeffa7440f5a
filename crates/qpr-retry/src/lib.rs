// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policy and per-agent-per-capability circuit breaker used by the
//! Agent Runtime invocation sequence (spec §4.4).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod breaker;
mod retry;

pub use breaker::{AllowDecision, BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use retry::{backoff_delay, retry_async, FailedAttempt, RetryMetadata, RetryOutcome, RetryPolicy};
