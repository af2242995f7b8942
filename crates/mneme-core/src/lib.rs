//! Mneme Core - Domain types, business logic, and services.
//!
//! This crate provides the core functionality for Mneme, including:
//!
//! - **Domain models**: [`Identity`], [`Item`], [`PageRequest`], [`LedgerEntry`]
//! - **Business logic**: identity normalization, batch validation, backward
//!   pagination, work set computation
//! - **Services**: [`HarvestService`] for collecting timelines into a sink
//! - **Traits**: [`TimelineClient`], [`ItemSink`], [`LedgerStore`] for dependency injection
//! - **Progress reporting**: [`ProgressReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! This crate performs no I/O of its own. Everything external goes through
//! traits:
//!
//! - [`TimelineClient`] - abstracts the remote service (e.g. a REST API)
//! - [`ItemSink`] - abstracts the output (e.g. a JSON Lines file)
//! - [`LedgerStore`] - abstracts ledger persistence (e.g. SQLite)
//!
//! # Example
//!
//! ```ignore
//! use mneme_core::{HarvestService, ProgressLedger, TracingReporter, normalize_batch};
//!
//! let batch = normalize_batch(["@nasa", "esa"])?;
//! let mut ledger = ProgressLedger::load(ledger_store).await?;
//! let harvest = HarvestService::new(client, sink);
//! let summary = harvest
//!     .run_with_progress(batch.identities(), &mut ledger, &TracingReporter)
//!     .await?;
//! println!("{} items", summary.stats.items);
//! ```

pub mod config;
pub mod error;
pub mod harvest;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod pagination;
pub mod progress;
pub mod sync;
pub mod traits;
pub mod validate;

// Configuration
pub use config::{
    ApiConfig, DEFAULT_API_URL, HarvestConfig, HarvestProfile, HttpConfig, Profile,
    default_profile_path, load_profile,
};

// Error handling
pub use error::{AppError, TransportErrorDetails, TransportErrorKind};

// Identities
pub use identity::{AddressMode, Identity, IdentityBatch, RawIdentity, normalize, normalize_batch};

// Domain models
pub use models::{Item, LookupResult, PageRequest};

// Ledger
pub use ledger::{LedgerCounts, LedgerEntry, ProgressLedger, RetryPolicy};

// Pagination
pub use pagination::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, TimelineFetch, TimelinePages, collect_timeline,
    fetch_timeline,
};

// Validation
pub use validate::{BatchValidator, LOOKUP_BATCH_LIMIT, ValidationReport};

// Run bookkeeping
pub use sync::{HarvestStats, HarvestSummary, IdentityResult, IdentityState};

// Progress reporting
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{ItemSink, LedgerStore, TimelineClient};

// Services (generic over trait implementations)
pub use harvest::{HarvestService, NOT_FOUND_MESSAGE};
