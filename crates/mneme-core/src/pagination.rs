//! Backward timeline pagination.
//!
//! A timeline is walked newest to oldest in fixed-size pages. Each request
//! after the first carries `max_id = min(previous page ids) - 1`; the walk
//! ends on the first page shorter than the page size (which includes the
//! empty page). An optional `since_id` bounds the walk from below so a
//! re-run only fetches items newer than the previous high-water mark.
//!
//! ```text
//! page 1: max_id=None          -> [990 .. 791]   (200 items)
//! page 2: max_id=790           -> [790 .. 591]   (200 items)
//! page 3: max_id=590           -> [590 .. 511]   (80 items, stop)
//! ```

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};

use crate::error::{AppError, TransportErrorDetails};
use crate::identity::Identity;
use crate::models::{Item, PageRequest};
use crate::traits::TimelineClient;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Largest page the remote service serves.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Starts a pagination walk over `identity`'s timeline.
///
/// Nothing is requested until the first call to
/// [`next_page`](TimelinePages::next_page).
pub fn fetch_timeline<'a, C: TimelineClient>(
    client: &'a C,
    identity: &Identity,
    since_id: Option<u64>,
    page_size: u32,
) -> TimelinePages<'a, C> {
    TimelinePages {
        client,
        identity: identity.clone(),
        since_id,
        page_size,
        max_id: None,
        pages_fetched: 0,
        done: false,
    }
}

/// A lazy, finite, non-restartable sequence of timeline pages.
pub struct TimelinePages<'a, C: TimelineClient> {
    client: &'a C,
    identity: Identity,
    since_id: Option<u64>,
    page_size: u32,
    max_id: Option<u64>,
    pages_fetched: usize,
    done: bool,
}

impl<'a, C: TimelineClient> TimelinePages<'a, C> {
    /// Fetches the next page, or `None` once the timeline is exhausted.
    ///
    /// After an error the sequence is finished; transport errors are
    /// returned unchanged.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Item>>, AppError> {
        if self.done {
            return Ok(None);
        }

        let request = PageRequest {
            max_id: self.max_id,
            since_id: self.since_id,
            count: self.page_size,
        };

        let page = match self.client.timeline_page(&self.identity, request).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.pages_fetched += 1;
        tracing::debug!(
            identity = %self.identity,
            max_id = ?self.max_id,
            size = page.len(),
            "Got page"
        );

        if page.is_empty() {
            self.done = true;
            if self.pages_fetched == 1 {
                tracing::warn!(identity = %self.identity, "No items found for identity");
            }
            return Ok(None);
        }

        if let Err(e) = check_page_order(&page, self.max_id) {
            self.done = true;
            return Err(e);
        }

        if page.len() < self.page_size as usize {
            self.done = true;
        }

        // Strictly decreasing, so the last item is the oldest.
        let oldest = page[page.len() - 1].id;
        match oldest.checked_sub(1) {
            Some(cursor) => self.max_id = Some(cursor),
            None => self.done = true,
        }

        // The since_id bound is treated as already seen, even if the
        // service returns it.
        let page = match self.since_id {
            Some(since) => page.into_iter().filter(|item| item.id > since).collect(),
            None => page,
        };

        Ok(Some(page))
    }

    /// Number of page requests answered so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Converts the walk into a `Stream` of pages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Item>, AppError>> + 'a {
        stream::try_unfold(self, |mut pages| async move {
            let page = pages.next_page().await?;
            Ok(page.map(|page| (page, pages)))
        })
    }
}

/// Everything one pagination walk produced.
#[derive(Debug, Default)]
pub struct TimelineFetch {
    /// Items in fetch order (newest first).
    pub items: Vec<Item>,
    /// Number of page requests made.
    pub pages: usize,
}

impl TimelineFetch {
    /// Id of the newest item fetched, if any.
    pub fn newest_id(&self) -> Option<u64> {
        self.items.iter().map(|item| item.id).max()
    }

    pub fn newest_created_at(&self) -> Option<DateTime<Utc>> {
        self.items.first().map(|item| item.created_at)
    }

    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.items.last().map(|item| item.created_at)
    }
}

/// Drains a pagination walk into memory.
///
/// On error the walk keeps its page count, so callers can still report how
/// far it got.
pub async fn collect_timeline<C: TimelineClient>(
    pages: &mut TimelinePages<'_, C>,
) -> Result<TimelineFetch, AppError> {
    let mut items = Vec::new();
    while let Some(page) = pages.next_page().await? {
        items.extend(page);
    }

    let fetch = TimelineFetch {
        items,
        pages: pages.pages_fetched(),
    };

    if let (Some(oldest), Some(newest)) = (fetch.oldest_created_at(), fetch.newest_created_at()) {
        tracing::info!(
            identity = %pages.identity(),
            items = fetch.items.len(),
            pages = fetch.pages,
            oldest = %oldest,
            newest = %newest,
            "Fetched timeline"
        );
    }

    Ok(fetch)
}

/// Rejects pages that would break the backward walk: ids must be strictly
/// decreasing and not above the cursor.
fn check_page_order(page: &[Item], max_id: Option<u64>) -> Result<(), AppError> {
    if let (Some(cursor), Some(first)) = (max_id, page.first())
        && first.id > cursor
    {
        return Err(AppError::Transport(TransportErrorDetails::malformed(
            format!("page starts at id {} above cursor {}", first.id, cursor),
        )));
    }

    if let Some(pair) = page.windows(2).find(|pair| pair[1].id >= pair[0].id) {
        return Err(AppError::Transport(TransportErrorDetails::malformed(
            format!(
                "page ids not strictly decreasing ({} then {})",
                pair[0].id, pair[1].id
            ),
        )));
    }

    Ok(())
}
