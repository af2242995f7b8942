//! Batch validation of target identities against the remote service.

use std::collections::BTreeSet;

use crate::error::AppError;
use crate::identity::{Identity, check_address_mode};
use crate::traits::TimelineClient;

/// Maximum number of identities the remote service accepts per lookup.
pub const LOOKUP_BATCH_LIMIT: usize = 100;

/// Outcome of validating a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Requested identities the service did not confirm.
    pub invalid: BTreeSet<Identity>,
    /// Requested identities the service confirmed.
    pub valid: BTreeSet<Identity>,
}

impl ValidationReport {
    pub fn all_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Partitions identities into valid and invalid with chunked lookups.
#[derive(Clone)]
pub struct BatchValidator<C: TimelineClient> {
    client: C,
}

impl<C: TimelineClient> BatchValidator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Validates `identities` against the remote service.
    ///
    /// Issues one lookup per [`LOOKUP_BATCH_LIMIT`] identities. Answers from
    /// the service are normalized before comparison, so a service that
    /// echoes `@NASA` still confirms a request for `nasa`.
    ///
    /// # Errors
    ///
    /// - [`AppError::EmptyBatch`] / [`AppError::MixedAddressMode`] before
    ///   any request is made
    /// - any transport error from a lookup
    pub async fn validate(
        &self,
        identities: &BTreeSet<Identity>,
    ) -> Result<ValidationReport, AppError> {
        let mode = check_address_mode(identities)?;
        let requested: Vec<Identity> = identities.iter().cloned().collect();
        let chunks = requested.len().div_ceil(LOOKUP_BATCH_LIMIT);

        let mut confirmed = BTreeSet::new();
        for (i, chunk) in requested.chunks(LOOKUP_BATCH_LIMIT).enumerate() {
            tracing::debug!(
                chunk = i + 1,
                chunks,
                size = chunk.len(),
                %mode,
                "Looking up identities"
            );
            let results = self.client.lookup(chunk, mode).await?;
            confirmed.extend(
                results
                    .into_iter()
                    .filter(|r| r.confirmed)
                    .filter_map(|r| r.identity.canonicalize().ok()),
            );
        }

        let (valid, invalid): (BTreeSet<_>, BTreeSet<_>) = identities
            .iter()
            .cloned()
            .partition(|identity| confirmed.contains(identity));

        if !invalid.is_empty() {
            tracing::info!(
                invalid = invalid.len(),
                valid = valid.len(),
                "Some identities were not confirmed by the service"
            );
        }

        Ok(ValidationReport { invalid, valid })
    }
}

