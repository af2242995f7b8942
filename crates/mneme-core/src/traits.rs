//! Trait definitions for external collaborators.
//!
//! The harvester only talks to the outside world through these traits:
//!
//! - [`TimelineClient`] - the remote service (lookup, timeline pages)
//! - [`ItemSink`] - append-only destination for harvested items
//! - [`LedgerStore`] - durable key-value backend for the progress ledger
//!
//! Concrete implementations live in `mneme-client` and `mneme-store`;
//! tests use in-memory mocks.
//!
//! # Example
//!
//! ```
//! use mneme_core::traits::TimelineClient;
//! use mneme_core::{AppError, Identity, Item, PageRequest};
//!
//! // Business logic uses traits, not concrete types
//! async fn newest_item<C: TimelineClient>(
//!     client: &C,
//!     identity: &Identity,
//! ) -> Result<Option<Item>, AppError> {
//!     let page = client.timeline_page(identity, PageRequest::first(None, 1)).await?;
//!     Ok(page.into_iter().next())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;

use crate::error::AppError;
use crate::identity::{AddressMode, Identity};
use crate::ledger::LedgerEntry;
use crate::models::{Item, LookupResult, PageRequest};

/// Client for the remote timeline service.
///
/// Implementations own transport concerns: authentication, rate-limit
/// waiting and timeouts. They must be safe to call from several tasks at
/// once when the harvester runs with `concurrency > 1`.
pub trait TimelineClient: Send + Sync + Clone {
    /// Looks up at most [`LOOKUP_BATCH_LIMIT`](crate::validate::LOOKUP_BATCH_LIMIT)
    /// identities in one request.
    ///
    /// Returns one result per identity the service knows about; identities
    /// it does not recognise may be omitted entirely.
    fn lookup(
        &self,
        identities: &[Identity],
        mode: AddressMode,
    ) -> impl Future<Output = Result<Vec<LookupResult>, AppError>> + Send;

    /// Fetches one page of an identity's timeline, newest first.
    fn timeline_page(
        &self,
        identity: &Identity,
        request: PageRequest,
    ) -> impl Future<Output = Result<Vec<Item>, AppError>> + Send;
}

/// Append-only destination for harvested items.
///
/// Implementations serialize concurrent `append` calls so that one call's
/// items are never interleaved with another's, and make each call's data
/// durable before returning.
pub trait ItemSink: Send + Sync {
    /// Appends items in the given order.
    fn append(&self, items: &[Item]) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Flushes any buffered output.
    fn flush(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Durable key-value backend for [`ProgressLedger`](crate::ledger::ProgressLedger).
pub trait LedgerStore: Send + Sync {
    /// Loads every persisted entry.
    fn load_all(
        &self,
    ) -> impl Future<Output = Result<HashMap<Identity, LedgerEntry>, AppError>> + Send;

    /// Durably inserts or replaces the entry for `identity`.
    ///
    /// Must not return before the write is committed.
    fn put(
        &self,
        identity: &Identity,
        entry: &LedgerEntry,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Deletes the entry for `identity`. Returns true if one existed.
    fn remove(&self, identity: &Identity) -> impl Future<Output = Result<bool, AppError>> + Send;
}
