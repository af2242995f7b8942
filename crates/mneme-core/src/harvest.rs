//! Harvest orchestration.
//!
//! [`HarvestService`] drives a whole run: it optionally validates the
//! requested identities, subtracts what the ledger already holds, then walks
//! every remaining timeline and appends the items to the sink.
//!
//! # Architecture
//!
//! The service is generic over two traits:
//! - [`TimelineClient`] - the remote service
//! - [`ItemSink`] - where items go
//!
//! The [`ProgressLedger`] is passed into each run rather than owned, so the
//! caller decides where it lives and can inspect it afterwards.
//!
//! # Failure isolation
//!
//! Transport and sink errors are scoped to one identity: it is marked failed
//! in the ledger and the run moves on. Items are buffered per identity and
//! only appended once its timeline has been fully fetched, so a failed
//! identity never leaves a partial timeline in the sink.
//!
//! A ledger write failure ends the run with `Err`: without durable progress
//! the next run could not resume correctly.
//!
//! # Concurrency
//!
//! With `concurrency > 1` several identities are fetched at once
//! (`buffer_unordered`). Each identity's items go to the sink in a single
//! `append` call and ledger updates are serialized behind an async mutex.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::config::HarvestConfig;
use crate::error::AppError;
use crate::identity::{Identity, check_address_mode};
use crate::ledger::ProgressLedger;
use crate::pagination::{TimelineFetch, TimelinePages, collect_timeline, fetch_timeline};
use crate::progress::{HarvestEvent, ProgressReporter, SilentReporter};
use crate::sync::{HarvestSummary, IdentityResult, IdentityState};
use crate::traits::{ItemSink, LedgerStore, TimelineClient};
use crate::validate::BatchValidator;

/// Error message recorded for identities the validator rejects.
pub const NOT_FOUND_MESSAGE: &str = "identity not found";

/// Harvest service for collecting timelines into a sink.
pub struct HarvestService<C, K>
where
    C: TimelineClient,
    K: ItemSink,
{
    client: C,
    sink: K,
    config: HarvestConfig,
}

impl<C, K> Clone for HarvestService<C, K>
where
    C: TimelineClient,
    K: ItemSink + Clone,
{
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C, K> HarvestService<C, K>
where
    C: TimelineClient,
    K: ItemSink,
{
    /// Creates a new harvest service with default configuration.
    pub fn new(client: C, sink: K) -> Self {
        Self::with_config(client, sink, HarvestConfig::default())
    }

    /// Creates a harvest service with custom configuration.
    pub fn with_config(client: C, sink: K, config: HarvestConfig) -> Self {
        Self {
            client,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Harvests every requested identity the ledger has not processed yet.
    ///
    /// # Errors
    ///
    /// - [`AppError::ConfigError`] for an out-of-range configuration
    /// - [`AppError::EmptyBatch`] / [`AppError::MixedAddressMode`] before any
    ///   request is made
    /// - lookup errors when `validate_first` is set
    /// - any ledger write failure, which stops the run
    /// - a sink flush failure at the end of the run
    ///
    /// Per-identity transport and sink errors are *not* returned; they are
    /// recorded in the ledger and in the summary.
    ///
    /// Requested identities are canonicalized first, so a hand-built
    /// `Handle("@NASA")` shares its ledger entry with `Handle("nasa")`.
    pub async fn run<L: LedgerStore>(
        &self,
        requested: &BTreeSet<Identity>,
        ledger: &mut ProgressLedger<L>,
    ) -> Result<HarvestSummary, AppError> {
        self.run_with_progress(requested, ledger, &SilentReporter)
            .await
    }

    /// Same as [`run`](Self::run), emitting events through `reporter`.
    pub async fn run_with_progress<L, R>(
        &self,
        requested: &BTreeSet<Identity>,
        ledger: &mut ProgressLedger<L>,
        reporter: &R,
    ) -> Result<HarvestSummary, AppError>
    where
        L: LedgerStore,
        R: ProgressReporter,
    {
        self.config.validate()?;
        let requested = requested
            .iter()
            .cloned()
            .map(Identity::canonicalize)
            .collect::<Result<BTreeSet<_>, _>>()?;
        check_address_mode(&requested)?;

        let mut summary = HarvestSummary::new();

        let candidates = if self.config.validate_first {
            let report = BatchValidator::new(self.client.clone())
                .validate(&requested)
                .await?;
            reporter.report(HarvestEvent::ValidationCompleted {
                valid: report.valid.len(),
                invalid: report.invalid.len(),
            });

            for identity in &report.invalid {
                ledger.mark_failed(identity, NOT_FOUND_MESSAGE).await?;
                reporter.report(HarvestEvent::IdentityFailed {
                    identity,
                    error: NOT_FOUND_MESSAGE,
                });
                summary.add(IdentityResult::failed(identity.clone(), 0, NOT_FOUND_MESSAGE));
                summary.stats.invalid += 1;
            }
            summary.invalid = report.invalid;
            report.valid
        } else {
            requested.clone()
        };

        let work_set = ledger.compute_work_set(&candidates, self.config.retry_policy);
        summary.skipped = candidates.difference(&work_set).cloned().collect();
        summary.stats.skipped = summary.skipped.len();

        tracing::info!(
            requested = requested.len(),
            work_set = work_set.len(),
            skipped = summary.stats.skipped,
            "Harvest started"
        );

        reporter.report(HarvestEvent::RunStarted {
            requested: requested.len(),
            work_set: work_set.len(),
            skipped: summary.stats.skipped,
        });

        let ledger = Mutex::new(ledger);
        let mut results = stream::iter(work_set)
            .map(|identity| self.harvest_identity(identity, &ledger, reporter))
            .buffer_unordered(self.config.concurrency);

        while let Some(result) = results.next().await {
            summary.add(result?);
        }

        self.sink.flush().await?;

        tracing::info!(
            succeeded = summary.stats.succeeded,
            failed = summary.stats.failed,
            skipped = summary.stats.skipped,
            items = summary.stats.items,
            "Harvest completed"
        );
        reporter.report(HarvestEvent::RunCompleted { summary: &summary });
        Ok(summary)
    }

    /// Fetches, writes and records one identity.
    ///
    /// Only ledger errors escape; everything else becomes a failed result.
    async fn harvest_identity<L, R>(
        &self,
        identity: Identity,
        ledger: &Mutex<&mut ProgressLedger<L>>,
        reporter: &R,
    ) -> Result<IdentityResult, AppError>
    where
        L: LedgerStore,
        R: ProgressReporter,
    {
        let mut state = IdentityState::Pending;
        let since_id = ledger.lock().await.last_seen_id(&identity);

        state = state.advance(IdentityState::Fetching);
        tracing::info!(%identity, ?since_id, "Fetching timeline");
        reporter.report(HarvestEvent::IdentityStarted {
            identity: &identity,
            since_id,
        });

        let mut pages = fetch_timeline(&self.client, &identity, since_id, self.config.page_size);
        let outcome = self.fetch_and_write(&mut pages).await;
        let pages_fetched = pages.pages_fetched();

        match outcome {
            Ok(fetch) => {
                let last_seen_id = {
                    let mut ledger = ledger.lock().await;
                    ledger.mark_succeeded(&identity, fetch.newest_id()).await?;
                    ledger.last_seen_id(&identity)
                };
                state = state.advance(IdentityState::Succeeded);

                tracing::info!(
                    %identity,
                    items = fetch.items.len(),
                    pages = fetch.pages,
                    ?last_seen_id,
                    "Identity harvested"
                );
                reporter.report(HarvestEvent::IdentitySucceeded {
                    identity: &identity,
                    items: fetch.items.len(),
                    pages: fetch.pages,
                    last_seen_id,
                });
                Ok(IdentityResult {
                    identity,
                    state,
                    items: fetch.items.len(),
                    pages: fetch.pages,
                    last_seen_id,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                ledger.lock().await.mark_failed(&identity, &message).await?;
                state = state.advance(IdentityState::Failed);

                tracing::error!(
                    %identity,
                    error = %message,
                    pages = pages_fetched,
                    "Identity failed"
                );
                reporter.report(HarvestEvent::IdentityFailed {
                    identity: &identity,
                    error: &message,
                });
                Ok(IdentityResult {
                    identity,
                    state,
                    items: 0,
                    pages: pages_fetched,
                    last_seen_id: None,
                    error: Some(message),
                })
            }
        }
    }

    async fn fetch_and_write(
        &self,
        pages: &mut TimelinePages<'_, C>,
    ) -> Result<TimelineFetch, AppError> {
        let fetch = collect_timeline(pages).await?;
        if !fetch.items.is_empty() {
            self.sink.append(&fetch.items).await?;
        }
        Ok(fetch)
    }
}
