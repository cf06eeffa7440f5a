// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pricing Pack Store (C2): a durable, immutable registry of pricing
//! snapshots and the supersede relation that anchors reproducibility.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use qpr_error::{ErrorKind, RuntimeError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const ID_PATTERN_DATE_LEN: usize = 10; // "YYYY-MM-DD"

/// Errors raised by [`PricingPackStore`] operations.
///
/// These are store-local (spec §4.1's named failure modes); callers that
/// surface them to a request convert via [`PricingStoreError::into_runtime_error`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum PricingStoreError {
    /// No pack exists with the given id.
    #[error("no pricing pack with id '{0}'")]
    NotFound(String),
    /// No non-superseded pack exists for the given as-of date.
    #[error("no pricing pack for as-of date {0}")]
    NoPackForDate(NaiveDate),
    /// A non-superseded pack already exists for this date.
    #[error("a non-superseded pricing pack already exists for {0}")]
    DuplicatePack(NaiveDate),
    /// The pack being superseded already has a successor.
    #[error("pack '{0}' is already superseded")]
    AlreadySuperseded(String),
    /// The supplied id does not match `^PP_\\d{{4}}-\\d{{2}}-\\d{{2}}(_D\\d+)?$`,
    /// or is the rejected literal `PP_latest`.
    #[error("invalid pricing pack id '{0}'")]
    InvalidPackId(String),
    /// The new pack's hash is identical to the pack it supersedes.
    #[error("supersede of '{0}' produced an identical content hash")]
    IdenticalHash(String),
}

impl PricingStoreError {
    /// Classify this store error into the runtime's stable [`ErrorKind`]
    /// taxonomy (spec §7). Pack-resolution failures at request entry are
    /// `MissingPricingPack`; structural violations are `ValidationFailure`.
    pub fn into_runtime_error(self) -> RuntimeError {
        match self {
            Self::NotFound(ref id) => RuntimeError::new(ErrorKind::MissingPricingPack, self.to_string())
                .with_context("pricing_pack_id", id.clone()),
            Self::NoPackForDate(date) => {
                RuntimeError::new(ErrorKind::MissingPricingPack, self.to_string())
                    .with_context("asof_date", date.to_string())
            }
            Self::DuplicatePack(_) | Self::AlreadySuperseded(_) | Self::IdenticalHash(_) => {
                RuntimeError::new(ErrorKind::ValidationFailure, self.to_string())
            }
            Self::InvalidPackId(_) => RuntimeError::new(ErrorKind::ValidationFailure, self.to_string()),
        }
    }
}

/// An immutable snapshot of prices, FX rates, and corporate actions for a
/// given as-of date (spec §3.1 "Pricing Pack").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingPack {
    /// `PP_YYYY-MM-DD` or `PP_YYYY-MM-DD_Dn` for the n-th supersede.
    pub id: String,
    /// The date this snapshot is valid as of.
    pub asof_date: NaiveDate,
    /// Content hash of the underlying price/FX/corporate-action tables.
    pub hash: String,
    /// Provider names that contributed to this pack.
    pub sources: BTreeSet<String>,
    /// Id of the pack that supersedes this one, if any. The only field
    /// that may ever change after creation.
    pub superseded_by: Option<String>,
    /// Whether this pack is considered fresh (not stale) by the loader.
    pub is_fresh: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether post-load reconciliation checks passed.
    pub reconciliation_passed: bool,
}

/// One entry in the append-only supersede audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupersedeAuditEntry {
    /// Pack id that was superseded.
    pub old_pack_id: String,
    /// Pack id that replaced it.
    pub new_pack_id: String,
    /// Operator-supplied reason for the restatement.
    pub reason: String,
    /// When the supersede occurred.
    pub recorded_at: DateTime<Utc>,
}

/// Validate a pricing pack id against `^PP_\d{4}-\d{2}-\d{2}(_D\d+)?$`,
/// rejecting the symbolic literal `PP_latest` (spec §4.1, §6.4).
pub fn validate_pack_id(id: &str) -> Result<(), PricingStoreError> {
    if id == "PP_latest" {
        return Err(PricingStoreError::InvalidPackId(id.to_string()));
    }
    let rest = match id.strip_prefix("PP_") {
        Some(rest) => rest,
        None => return Err(PricingStoreError::InvalidPackId(id.to_string())),
    };
    let (date_part, supersede_part) = match rest.split_once('_') {
        Some((d, s)) => (d, Some(s)),
        None => (rest, None),
    };
    if date_part.len() != ID_PATTERN_DATE_LEN || NaiveDate::parse_from_str(date_part, "%Y-%m-%d").is_err() {
        return Err(PricingStoreError::InvalidPackId(id.to_string()));
    }
    if let Some(supersede) = supersede_part {
        let n = supersede.strip_prefix('D').unwrap_or("");
        if n.is_empty() || !n.chars().all(|c| c.is_ascii_digit()) {
            return Err(PricingStoreError::InvalidPackId(id.to_string()));
        }
    }
    Ok(())
}

fn supersede_depth(id: &str) -> u32 {
    id.rsplit_once("_D")
        .and_then(|(_, n)| n.parse::<u32>().ok())
        .unwrap_or(0)
}

#[derive(Default)]
struct Inner {
    packs: HashMap<String, PricingPack>,
    /// Current non-superseded pack id for a given date, if any.
    current_for_date: HashMap<NaiveDate, String>,
    audit_log: Vec<SupersedeAuditEntry>,
}

/// Append-only, process-wide registry of [`PricingPack`]s. Cheaply
/// cloneable; clones share the same underlying store (spec §5: readers use
/// snapshot isolation, `supersede` is linearizable).
#[derive(Clone, Default)]
pub struct PricingPackStore {
    inner: Arc<Mutex<Inner>>,
}

impl PricingPackStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a pack by id.
    pub async fn get_pack(&self, pack_id: &str) -> Result<PricingPack, PricingStoreError> {
        let inner = self.inner.lock().await;
        inner
            .packs
            .get(pack_id)
            .cloned()
            .ok_or_else(|| PricingStoreError::NotFound(pack_id.to_string()))
    }

    /// Return the terminal (non-superseded) pack for `asof_date`.
    pub async fn get_latest(&self, asof_date: NaiveDate) -> Result<PricingPack, PricingStoreError> {
        let inner = self.inner.lock().await;
        let id = inner
            .current_for_date
            .get(&asof_date)
            .ok_or(PricingStoreError::NoPackForDate(asof_date))?;
        Ok(inner.packs[id].clone())
    }

    /// Insert a new, non-superseded pack for `asof_date`.
    pub async fn create_pack(
        &self,
        asof_date: NaiveDate,
        sources: BTreeSet<String>,
        hash: impl Into<String>,
    ) -> Result<PricingPack, PricingStoreError> {
        let mut inner = self.inner.lock().await;
        if inner.current_for_date.contains_key(&asof_date) {
            return Err(PricingStoreError::DuplicatePack(asof_date));
        }
        let id = format!("PP_{}", asof_date.format("%Y-%m-%d"));
        let pack = PricingPack {
            id: id.clone(),
            asof_date,
            hash: hash.into(),
            sources,
            superseded_by: None,
            is_fresh: true,
            created_at: Utc::now(),
            reconciliation_passed: true,
        };
        inner.packs.insert(id.clone(), pack.clone());
        inner.current_for_date.insert(asof_date, id);
        tracing::info!(target: "qpr.pricing", pack_id = %pack.id, "pricing pack created");
        Ok(pack)
    }

    /// Supersede `old_pack_id` with a newly-minted restated pack,
    /// atomically (spec §4.1, §5 linearizability).
    pub async fn supersede(
        &self,
        old_pack_id: &str,
        sources: BTreeSet<String>,
        hash: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(PricingPack, PricingPack), PricingStoreError> {
        let hash = hash.into();
        let reason = reason.into();
        let mut inner = self.inner.lock().await;

        let old = inner
            .packs
            .get(old_pack_id)
            .cloned()
            .ok_or_else(|| PricingStoreError::NotFound(old_pack_id.to_string()))?;
        if old.superseded_by.is_some() {
            return Err(PricingStoreError::AlreadySuperseded(old_pack_id.to_string()));
        }
        if old.hash == hash {
            return Err(PricingStoreError::IdenticalHash(old_pack_id.to_string()));
        }

        let depth = supersede_depth(old_pack_id) + 1;
        let new_id = format!("PP_{}_D{}", old.asof_date.format("%Y-%m-%d"), depth);

        let new_pack = PricingPack {
            id: new_id.clone(),
            asof_date: old.asof_date,
            hash,
            sources,
            superseded_by: None,
            is_fresh: true,
            created_at: Utc::now(),
            reconciliation_passed: true,
        };

        let mut updated_old = old.clone();
        updated_old.superseded_by = Some(new_id.clone());

        inner.packs.insert(old_pack_id.to_string(), updated_old.clone());
        inner.packs.insert(new_id.clone(), new_pack.clone());
        inner.current_for_date.insert(old.asof_date, new_id.clone());
        inner.audit_log.push(SupersedeAuditEntry {
            old_pack_id: old_pack_id.to_string(),
            new_pack_id: new_id.clone(),
            reason,
            recorded_at: Utc::now(),
        });

        tracing::info!(
            target: "qpr.pricing",
            old_pack_id,
            new_pack_id = %new_id,
            "pricing pack superseded"
        );

        Ok((updated_old, new_pack))
    }

    /// Depth-first traversal of the supersede chain starting at
    /// `root_pack_id`, terminating when `superseded_by` is null.
    pub async fn list_chain(&self, root_pack_id: &str) -> Result<Vec<String>, PricingStoreError> {
        let inner = self.inner.lock().await;
        let mut chain = Vec::new();
        let mut current = root_pack_id.to_string();
        loop {
            let pack = inner
                .packs
                .get(&current)
                .ok_or_else(|| PricingStoreError::NotFound(current.clone()))?;
            chain.push(pack.id.clone());
            match &pack.superseded_by {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        Ok(chain)
    }

    /// Read-only snapshot of the supersede audit log, oldest first.
    pub async fn audit_log(&self) -> Vec<SupersedeAuditEntry> {
        self.inner.lock().await.audit_log.clone()
    }
}
