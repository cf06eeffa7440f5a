// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request Context (C1): immutable per-request identity, and the
//! cancellation primitive it carries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

/// A cloneable, cheaply-shareable token used to signal cancellation.
///
/// All clones share the same underlying state; cancelling one immediately
/// makes every clone observe `is_cancelled() == true`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a new token that is **not** cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

/// Carries immutable per-request identity: user, portfolio, as-of date,
/// pricing-pack id, ledger commit hash, trace id (spec §3.1, C1).
///
/// Created once at request entry and passed by reference to every
/// capability invocation for the lifetime of the request.
#[derive(Clone)]
pub struct RequestContext {
    /// Unique id for this request.
    pub request_id: Uuid,
    /// Identity of the requesting user (used by the rights check, §4.6).
    pub user_id: String,
    /// Portfolio this request concerns.
    pub portfolio_id: String,
    /// As-of date the computation should run against.
    pub asof_date: NaiveDate,
    /// Pricing pack to anchor all capability invocations to. `None` means
    /// "resolve the latest non-superseded pack for `asof_date`"; a pattern
    /// that requires one and finds none fails with `MissingPricingPack`.
    pub pricing_pack_id: Option<String>,
    /// Commit hash of the ledger state this request observes.
    pub ledger_commit_hash: Option<String>,
    /// Correlation id threaded through logs and error context.
    pub correlation_id: String,
    /// Wall-clock budget for the whole request.
    pub timeout: Duration,
    /// Rights the requesting user holds, checked against
    /// `pattern.rights_required`.
    pub rights: Vec<String>,
    /// Cooperative cancellation signal, polled between steps.
    pub cancellation_token: CancellationToken,
}

/// Builder for [`RequestContext`], following the fluent `#[must_use]`
/// convention used throughout this workspace.
pub struct RequestContextBuilder {
    request_id: Uuid,
    user_id: String,
    portfolio_id: String,
    asof_date: NaiveDate,
    pricing_pack_id: Option<String>,
    ledger_commit_hash: Option<String>,
    correlation_id: Option<String>,
    timeout: Duration,
    rights: Vec<String>,
    cancellation_token: CancellationToken,
}

impl RequestContextBuilder {
    /// Start building a context for the given user/portfolio/as-of date.
    pub fn new(user_id: impl Into<String>, portfolio_id: impl Into<String>, asof_date: NaiveDate) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            portfolio_id: portfolio_id.into(),
            asof_date,
            pricing_pack_id: None,
            ledger_commit_hash: None,
            correlation_id: None,
            timeout: Duration::from_secs(30),
            rights: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Pin an explicit pricing pack rather than resolving the latest.
    #[must_use]
    pub fn pricing_pack_id(mut self, id: impl Into<String>) -> Self {
        self.pricing_pack_id = Some(id.into());
        self
    }

    /// Set the ledger commit hash.
    #[must_use]
    pub fn ledger_commit_hash(mut self, hash: impl Into<String>) -> Self {
        self.ledger_commit_hash = Some(hash.into());
        self
    }

    /// Override the correlation id (defaults to `request_id`).
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Override the request wall-clock budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declare the rights held by the requesting user.
    #[must_use]
    pub fn rights(mut self, rights: impl IntoIterator<Item = String>) -> Self {
        self.rights = rights.into_iter().collect();
        self
    }

    /// Use an externally-owned cancellation token instead of a fresh one.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Finish building.
    pub fn build(self) -> RequestContext {
        let correlation_id = self.correlation_id.unwrap_or_else(|| self.request_id.to_string());
        RequestContext {
            request_id: self.request_id,
            user_id: self.user_id,
            portfolio_id: self.portfolio_id,
            asof_date: self.asof_date,
            pricing_pack_id: self.pricing_pack_id,
            ledger_commit_hash: self.ledger_commit_hash,
            correlation_id,
            timeout: self.timeout,
            rights: self.rights,
            cancellation_token: self.cancellation_token,
        }
    }
}

/// Wire-safe projection of a [`RequestContext`], for API boundaries (the
/// cancellation token and rights list stay server-side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContextOverrides {
    /// Override the pricing pack pin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_pack_id: Option<String>,
    /// Override the ledger commit hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_commit_hash: Option<String>,
    /// Override the as-of date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asof_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn builder_defaults_correlation_id_to_request_id() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let ctx = RequestContextBuilder::new("alice", "port-1", date).build();
        assert_eq!(ctx.correlation_id, ctx.request_id.to_string());
        assert!(ctx.pricing_pack_id.is_none());
    }

    #[test]
    fn builder_full() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let ctx = RequestContextBuilder::new("alice", "port-1", date)
            .pricing_pack_id("PP_2025-09-01")
            .ledger_commit_hash("abc123")
            .correlation_id("corr-1")
            .timeout(Duration::from_secs(5))
            .rights(["reports.read".to_string()])
            .build();
        assert_eq!(ctx.pricing_pack_id.as_deref(), Some("PP_2025-09-01"));
        assert_eq!(ctx.ledger_commit_hash.as_deref(), Some("abc123"));
        assert_eq!(ctx.correlation_id, "corr-1");
        assert_eq!(ctx.timeout, Duration::from_secs(5));
        assert_eq!(ctx.rights, vec!["reports.read".to_string()]);
    }
}
