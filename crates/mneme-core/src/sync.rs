//! Run bookkeeping: per-identity states, outcomes and the run summary.
//!
//! Pure data, decoupled from I/O and orchestration.

use std::collections::BTreeSet;
use std::fmt;

use crate::identity::Identity;

/// Per-identity state within one run.
///
/// ```text
/// Pending -> Fetching -> Succeeded
///                     -> Failed
/// Pending -> Failed                  (rejected by validation)
/// ```
///
/// Terminal states are final for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityState {
    #[default]
    Pending,
    Fetching,
    Succeeded,
    Failed,
}

impl IdentityState {
    pub fn is_terminal(self) -> bool {
        matches!(self, IdentityState::Succeeded | IdentityState::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(self, next: IdentityState) -> bool {
        matches!(
            (self, next),
            (IdentityState::Pending, IdentityState::Fetching)
                | (IdentityState::Pending, IdentityState::Failed)
                | (IdentityState::Fetching, IdentityState::Succeeded)
                | (IdentityState::Fetching, IdentityState::Failed)
        )
    }

    /// Moves to `next`. Illegal transitions are a bug in the caller.
    pub fn advance(self, next: IdentityState) -> IdentityState {
        debug_assert!(
            self.can_advance_to(next),
            "illegal identity transition {} -> {}",
            self,
            next
        );
        next
    }
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentityState::Pending => "pending",
            IdentityState::Fetching => "fetching",
            IdentityState::Succeeded => "succeeded",
            IdentityState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// How one identity ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResult {
    pub identity: Identity,
    pub state: IdentityState,
    /// Items written to the sink.
    pub items: usize,
    /// Page requests made.
    pub pages: usize,
    /// High-water mark recorded in the ledger after this run.
    pub last_seen_id: Option<u64>,
    pub error: Option<String>,
}

impl IdentityResult {
    pub fn succeeded(
        identity: Identity,
        items: usize,
        pages: usize,
        last_seen_id: Option<u64>,
    ) -> Self {
        Self {
            identity,
            state: IdentityState::Succeeded,
            items,
            pages,
            last_seen_id,
            error: None,
        }
    }

    pub fn failed(identity: Identity, pages: usize, error: impl Into<String>) -> Self {
        Self {
            identity,
            state: IdentityState::Failed,
            items: 0,
            pages,
            last_seen_id: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == IdentityState::Succeeded
    }
}

/// Counters for a harvest run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestStats {
    pub succeeded: usize,
    pub failed: usize,
    /// Requested but already processed according to the ledger.
    pub skipped: usize,
    /// Rejected by validation (also counted in `failed`).
    pub invalid: usize,
    /// Items written to the sink.
    pub items: usize,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal result.
    pub fn record(&mut self, result: &IdentityResult) {
        match result.state {
            IdentityState::Succeeded => {
                self.succeeded += 1;
                self.items += result.items;
            }
            IdentityState::Failed => self.failed += 1,
            IdentityState::Pending | IdentityState::Fetching => {}
        }
    }

    /// Identities attempted in this run.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed - self.invalid
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Everything a run produced, for display and assertions.
#[derive(Debug, Default, Clone)]
pub struct HarvestSummary {
    pub stats: HarvestStats,
    /// Terminal results in completion order.
    pub results: Vec<IdentityResult>,
    pub skipped: BTreeSet<Identity>,
    pub invalid: BTreeSet<Identity>,
}

impl HarvestSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: IdentityResult) {
        self.stats.record(&result);
        self.results.push(result);
    }

    pub fn result(&self, identity: &Identity) -> Option<&IdentityResult> {
        self.results.iter().find(|r| &r.identity == identity)
    }

    pub fn failures(&self) -> impl Iterator<Item = &IdentityResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn is_clean(&self) -> bool {
        self.stats.failed == 0
    }
}
