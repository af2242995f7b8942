//! Domain models shared by the harvester and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// One collected timeline entry.
///
/// `payload` is the record exactly as the remote service returned it; sinks
/// write it verbatim. `id`, `author` and `created_at` are extracted copies
/// used for cursors, logging and the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Monotonic 64-bit id, larger is newer.
    pub id: u64,
    pub author: Identity,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Cursor bounds for one timeline page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Only return items with `id <= max_id`.
    pub max_id: Option<u64>,
    /// Only return items newer than this id.
    pub since_id: Option<u64>,
    /// Maximum number of items to return.
    pub count: u32,
}

impl PageRequest {
    /// The first request of a pagination walk: no upper bound.
    pub fn first(since_id: Option<u64>, count: u32) -> Self {
        Self {
            max_id: None,
            since_id,
            count,
        }
    }
}

/// The service's answer about one identity during a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub identity: Identity,
    pub confirmed: bool,
}

impl LookupResult {
    pub fn confirmed(identity: Identity) -> Self {
        Self {
            identity,
            confirmed: true,
        }
    }
}
