//! Progress reporting for harvest runs.
//!
//! [`HarvestService`](crate::harvest::HarvestService) emits a [`HarvestEvent`]
//! at every state transition. The service logs run and identity outcomes
//! itself at `info`/`error`, whichever reporter is passed; reporters are for
//! callers that want the events as data (progress bars, counters, tests).
//! [`TracingReporter`] mirrors the raw event stream at `debug` level.

use tracing::debug;

use crate::identity::Identity;
use crate::sync::HarvestSummary;

// =============================================================================
// Harvest Events
// =============================================================================

/// Events emitted during a harvest run.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// Validation finished before any harvesting.
    ValidationCompleted { valid: usize, invalid: usize },
    /// The work set is known.
    RunStarted {
        requested: usize,
        work_set: usize,
        skipped: usize,
    },
    /// Fetching started for one identity.
    IdentityStarted {
        identity: &'a Identity,
        since_id: Option<u64>,
    },
    /// All pages fetched and written for one identity.
    IdentitySucceeded {
        identity: &'a Identity,
        items: usize,
        pages: usize,
        last_seen_id: Option<u64>,
    },
    /// Fetching or writing failed for one identity.
    IdentityFailed {
        identity: &'a Identity,
        error: &'a str,
    },
    /// Every identity in the work set reached a terminal state.
    RunCompleted { summary: &'a HarvestSummary },
}

// =============================================================================
// Progress Reporter Trait
// =============================================================================

/// Receives [`HarvestEvent`]s.
pub trait ProgressReporter: Send + Sync {
    /// Called when a harvest event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Reporter that mirrors every event as a `debug` record on the
/// `mneme::progress` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::ValidationCompleted { valid, invalid } => {
                debug!(target: "mneme::progress", valid, invalid, "validation_completed");
            }
            HarvestEvent::RunStarted {
                requested,
                work_set,
                skipped,
            } => {
                debug!(target: "mneme::progress", requested, work_set, skipped, "run_started");
            }
            HarvestEvent::IdentityStarted { identity, since_id } => {
                debug!(target: "mneme::progress", %identity, ?since_id, "identity_started");
            }
            HarvestEvent::IdentitySucceeded {
                identity,
                items,
                pages,
                last_seen_id,
            } => {
                debug!(
                    target: "mneme::progress",
                    %identity, items, pages, ?last_seen_id,
                    "identity_succeeded"
                );
            }
            HarvestEvent::IdentityFailed { identity, error } => {
                debug!(target: "mneme::progress", %identity, %error, "identity_failed");
            }
            HarvestEvent::RunCompleted { summary } => {
                debug!(
                    target: "mneme::progress",
                    succeeded = summary.stats.succeeded,
                    failed = summary.stats.failed,
                    skipped = summary.stats.skipped,
                    items = summary.stats.items,
                    "run_completed"
                );
            }
        }
    }
}
