//! Durable per-identity progress ledger.
//!
//! The ledger records, for each identity ever attempted, whether it was
//! processed, whether that attempt failed, and the newest item id seen. It is
//! loaded once at the start of a run and every change is written through to
//! the [`LedgerStore`] immediately, so a run that halts after K identities
//! leaves exactly K entries behind and the next run resumes from there.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::identity::Identity;
use crate::traits::LedgerStore;

/// Progress record for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The identity has been attempted (successfully or not).
    pub processed: bool,
    /// Newest item id collected so far; the lower bound of the next run.
    pub last_seen_id: Option<u64>,
    /// The last attempt failed.
    pub failed: bool,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn succeeded(last_seen_id: Option<u64>) -> Self {
        Self {
            processed: true,
            last_seen_id,
            failed: false,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(last_seen_id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            processed: true,
            last_seen_id,
            failed: true,
            error_message: Some(error.into()),
            updated_at: Utc::now(),
        }
    }
}

/// Which ledger entries keep an identity out of the work set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    /// Every processed identity is skipped, failed ones included.
    #[default]
    SkipProcessed,
    /// Failed identities are attempted again.
    RetryFailed,
}

/// Counts of ledger entries by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl LedgerCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// In-memory view of the ledger with write-through persistence.
pub struct ProgressLedger<L: LedgerStore> {
    store: L,
    entries: HashMap<Identity, LedgerEntry>,
}

impl<L: LedgerStore> ProgressLedger<L> {
    /// Loads every persisted entry from `store`.
    pub async fn load(store: L) -> Result<Self, AppError> {
        let entries = store.load_all().await?;
        tracing::debug!(entries = entries.len(), "Loaded progress ledger");
        Ok(Self { store, entries })
    }

    pub fn entry(&self, identity: &Identity) -> Option<&LedgerEntry> {
        self.entries.get(identity)
    }

    pub fn entries(&self) -> &HashMap<Identity, LedgerEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> LedgerCounts {
        self.entries
            .values()
            .fold(LedgerCounts::default(), |mut counts, entry| {
                if entry.failed {
                    counts.failed += 1;
                } else {
                    counts.succeeded += 1;
                }
                counts
            })
    }

    /// High-water mark for `identity`, if one was recorded.
    pub fn last_seen_id(&self, identity: &Identity) -> Option<u64> {
        self.entries.get(identity).and_then(|e| e.last_seen_id)
    }

    /// Returns `requested` minus the identities the policy says to skip.
    ///
    /// # Examples
    ///
    /// A fresh ledger skips nothing:
    ///
    /// ```ignore
    /// let work = ledger.compute_work_set(&requested, RetryPolicy::SkipProcessed);
    /// assert_eq!(work, requested);
    /// ```
    pub fn compute_work_set(
        &self,
        requested: &BTreeSet<Identity>,
        policy: RetryPolicy,
    ) -> BTreeSet<Identity> {
        requested
            .iter()
            .filter(|identity| match self.entries.get(*identity) {
                None => true,
                Some(entry) => match policy {
                    RetryPolicy::SkipProcessed => !entry.processed,
                    RetryPolicy::RetryFailed => !entry.processed || entry.failed,
                },
            })
            .cloned()
            .collect()
    }

    /// Records a successful harvest and persists it.
    ///
    /// `None` keeps the previous high-water mark; a mark is never lowered.
    pub async fn mark_succeeded(
        &mut self,
        identity: &Identity,
        last_seen_id: Option<u64>,
    ) -> Result<(), AppError> {
        let previous = self.last_seen_id(identity);
        let mark = previous.max(last_seen_id);
        self.persist(identity, LedgerEntry::succeeded(mark)).await
    }

    /// Records a failed harvest and persists it.
    ///
    /// The previous high-water mark survives so a later retry stays bounded.
    pub async fn mark_failed(
        &mut self,
        identity: &Identity,
        error: impl Into<String>,
    ) -> Result<(), AppError> {
        let previous = self.last_seen_id(identity);
        self.persist(identity, LedgerEntry::failed(previous, error))
            .await
    }

    /// Forgets `identity` so the next run harvests it from scratch.
    pub async fn reset(&mut self, identity: &Identity) -> Result<bool, AppError> {
        let existed = self.store.remove(identity).await?;
        self.entries.remove(identity);
        Ok(existed)
    }

    /// Forgets every failed identity. Returns how many were removed.
    pub async fn reset_failed(&mut self) -> Result<usize, AppError> {
        let failed: Vec<Identity> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.failed)
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &failed {
            self.store.remove(identity).await?;
            self.entries.remove(identity);
        }
        Ok(failed.len())
    }

    async fn persist(&mut self, identity: &Identity, entry: LedgerEntry) -> Result<(), AppError> {
        // Store first: the in-memory view never runs ahead of durable state.
        self.store.put(identity, &entry).await?;
        self.entries.insert(identity.clone(), entry);
        Ok(())
    }
}
