//! Integration tests for HarvestService.
//!
//! These tests verify the orchestration logic (work set, failure isolation,
//! resumability) using mock implementations.

use std::collections::BTreeSet;

use crate::integration::common::{
    MemoryLedgerStore, MemorySink, MockTimelineClient, handle, make_item,
};
use mneme_core::{
    AppError, HarvestConfig, HarvestService, Identity, IdentityState, LedgerEntry,
    NOT_FOUND_MESSAGE, ProgressLedger, RetryPolicy, TransportErrorKind,
};

fn targets(names: &[&str]) -> BTreeSet<Identity> {
    names.iter().map(|n| handle(n)).collect()
}

/// Three identities, each with a single page shorter than the page size:
/// one request per identity, all succeed, mark = max id.
#[tokio::test]
async fn test_harvest_single_short_page() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("alice"), 1..=50)
        .with_timeline(handle("dave"), 1..=120)
        .with_timeline(handle("erin"), 1..=7);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());

    // Act
    let summary = service
        .run(&targets(&["alice", "dave", "erin"]), &mut ledger)
        .await
        .unwrap();

    // Assert
    assert_eq!(summary.stats.succeeded, 3);
    assert_eq!(summary.stats.items, 177);
    assert_eq!(sink.items().len(), 177);

    for (name, newest) in [("alice", 50), ("dave", 120), ("erin", 7)] {
        assert_eq!(client.requests_for(&handle(name)).len(), 1, "{name}");
        assert_eq!(summary.result(&handle(name)).unwrap().pages, 1, "{name}");

        let entry = store.get(&handle(name)).unwrap();
        assert!(entry.processed);
        assert!(!entry.failed);
        assert_eq!(entry.last_seen_id, Some(newest));
    }
    assert_eq!(client.page_requests().len(), 3);
}

/// Pages of 200, 200, 80: three requests with descending cursors.
#[tokio::test]
async fn test_harvest_multi_page_timeline() {
    // Arrange
    let client = MockTimelineClient::new().with_timeline(handle("bob"), 1..=480);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());

    // Act
    let summary = service.run(&targets(&["bob"]), &mut ledger).await.unwrap();

    // Assert
    let requests = client.requests_for(&handle("bob"));
    let cursors: Vec<Option<u64>> = requests.iter().map(|r| r.max_id).collect();
    assert_eq!(cursors, vec![None, Some(280), Some(80)]);
    assert!(requests.iter().all(|r| r.count == 200 && r.since_id.is_none()));

    assert_eq!(summary.result(&handle("bob")).unwrap().pages, 3);
    assert_eq!(sink.ids_for(&handle("bob")).len(), 480);
    assert_eq!(store.get(&handle("bob")).unwrap().last_seen_id, Some(480));

    // Items arrive newest first, strictly decreasing.
    let ids = sink.ids_for(&handle("bob"));
    assert!(ids.windows(2).all(|w| w[0] > w[1]));
}

/// A prior mark bounds the walk; no new items keeps the mark.
#[tokio::test]
async fn test_harvest_since_id_without_new_items() {
    // Arrange
    let client = MockTimelineClient::new().with_timeline(handle("carol"), 900..=1000);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    store.seed(
        handle("carol"),
        LedgerEntry {
            processed: false,
            last_seen_id: Some(1000),
            failed: false,
            error_message: None,
            updated_at: chrono::Utc::now(),
        },
    );
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());

    // Act
    let summary = service.run(&targets(&["carol"]), &mut ledger).await.unwrap();

    // Assert
    let requests = client.requests_for(&handle("carol"));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].since_id, Some(1000));
    assert_eq!(requests[0].max_id, None);

    let result = summary.result(&handle("carol")).unwrap();
    assert_eq!(result.state, IdentityState::Succeeded);
    assert_eq!(result.items, 0);
    assert!(sink.items().is_empty());
    assert_eq!(sink.append_count(), 0);

    let entry = store.get(&handle("carol")).unwrap();
    assert!(entry.processed);
    assert_eq!(entry.last_seen_id, Some(1000));
}

/// Retrying a failed identity only collects items above its mark.
#[tokio::test]
async fn test_retry_failed_collects_only_newer_items() {
    // Arrange
    let client = MockTimelineClient::new().with_timeline(handle("dave"), 1..=350);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    store.seed(handle("dave"), LedgerEntry::failed(Some(300), "timeout"));
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let config = HarvestConfig::default().with_retry_policy(RetryPolicy::RetryFailed);
    let service = HarvestService::with_config(client.clone(), sink.clone(), config);

    // Act
    service.run(&targets(&["dave"]), &mut ledger).await.unwrap();

    // Assert
    let ids = sink.ids_for(&handle("dave"));
    assert_eq!(ids.len(), 50);
    assert!(ids.iter().all(|id| *id > 300));

    let entry = store.get(&handle("dave")).unwrap();
    assert!(!entry.failed);
    assert_eq!(entry.error_message, None);
    assert_eq!(entry.last_seen_id, Some(350));
}

/// Failed identities stay out of the work set under the default policy.
#[tokio::test]
async fn test_failed_identities_skipped_by_default() {
    // Arrange
    let client = MockTimelineClient::new().with_timeline(handle("erin"), 1..=10);
    let store = MemoryLedgerStore::new();
    store.seed(handle("erin"), LedgerEntry::failed(None, "404"));
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), MemorySink::new());

    // Act
    let summary = service.run(&targets(&["erin"]), &mut ledger).await.unwrap();

    // Assert
    assert!(client.page_requests().is_empty());
    assert_eq!(summary.stats.skipped, 1);
    assert!(summary.skipped.contains(&handle("erin")));
}

/// Running twice without a reset writes nothing the second time.
#[tokio::test]
async fn test_second_run_writes_no_duplicates() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("alice"), 1..=120)
        .with_timeline(handle("bob"), 1..=30);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let service = HarvestService::new(client.clone(), sink.clone());
    let requested = targets(&["alice", "bob"]);

    // Act
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    service.run(&requested, &mut ledger).await.unwrap();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let second = service.run(&requested, &mut ledger).await.unwrap();

    // Assert
    assert_eq!(second.stats.skipped, 2);
    assert_eq!(second.stats.items, 0);
    let items = sink.items();
    let unique: BTreeSet<(Identity, u64)> =
        items.iter().map(|i| (i.author.clone(), i.id)).collect();
    assert_eq!(unique.len(), items.len());
    assert_eq!(items.len(), 150);
}

/// One identity's transport error doesn't stop the others.
#[tokio::test]
async fn test_failure_isolation() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("a"), 1..=5)
        .with_failure(handle("b"), TransportErrorKind::ServerError, "over capacity")
        .with_timeline(handle("c"), 1..=7);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());

    // Act
    let summary = service
        .run(&targets(&["a", "b", "c"]), &mut ledger)
        .await
        .unwrap();

    // Assert
    assert_eq!(summary.stats.succeeded, 2);
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(sink.items().len(), 12);

    let failed = summary.result(&handle("b")).unwrap();
    assert_eq!(failed.state, IdentityState::Failed);
    assert!(failed.error.as_deref().unwrap().contains("over capacity"));

    let entry = store.get(&handle("b")).unwrap();
    assert!(entry.processed);
    assert!(entry.failed);
    assert!(entry.error_message.unwrap().contains("over capacity"));
}

/// A failure mid-walk leaves nothing of that identity in the sink.
#[tokio::test]
async fn test_mid_walk_failure_writes_nothing() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("frank"), 1..=450)
        .with_failure_on_page(handle("frank"), 2, TransportErrorKind::Timeout, "timed out");
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());

    // Act
    let summary = service.run(&targets(&["frank"]), &mut ledger).await.unwrap();

    // Assert
    let result = summary.result(&handle("frank")).unwrap();
    assert_eq!(result.state, IdentityState::Failed);
    assert_eq!(result.pages, 1);
    assert!(sink.items().is_empty());
    assert!(store.get(&handle("frank")).unwrap().failed);
}

/// A sink error is scoped to the identity being written.
#[tokio::test]
async fn test_sink_failure_isolation() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("good"), 1..=3)
        .with_timeline(handle("bad"), 1..=3);
    let sink = MemorySink::rejecting(handle("bad"));
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client, sink.clone());

    // Act
    let summary = service
        .run(&targets(&["good", "bad"]), &mut ledger)
        .await
        .unwrap();

    // Assert
    assert_eq!(summary.stats.succeeded, 1);
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(sink.ids_for(&handle("good")).len(), 3);
    let entry = store.get(&handle("bad")).unwrap();
    assert!(entry.error_message.unwrap().contains("Sink write error"));
}

/// A page that breaks ordering is a per-identity failure, not a hang.
#[tokio::test]
async fn test_malformed_page_fails_identity() {
    // Arrange: second page jumps back above the cursor.
    let full_page: Vec<u64> = (301..=500).rev().collect();
    let client = MockTimelineClient::new()
        .with_scripted_pages(handle("loop"), vec![full_page.clone(), full_page]);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());

    // Act
    let summary = service.run(&targets(&["loop"]), &mut ledger).await.unwrap();

    // Assert
    assert_eq!(client.requests_for(&handle("loop")).len(), 2);
    assert_eq!(summary.stats.failed, 1);
    assert!(sink.items().is_empty());
}

/// A ledger write failure stops the run with an error.
#[tokio::test]
async fn test_ledger_failure_is_fatal() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("a"), 1..=3)
        .with_timeline(handle("b"), 1..=3)
        .with_timeline(handle("c"), 1..=3);
    let store = MemoryLedgerStore::failing_after(1);
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), MemorySink::new());

    // Act
    let result = service.run(&targets(&["a", "b", "c"]), &mut ledger).await;

    // Assert
    assert!(matches!(result, Err(AppError::LedgerError(_))));
    assert_eq!(store.len(), 1);
    assert_eq!(client.page_requests().len(), 2);
}

/// After halting at K of N, the restart only fetches the remaining N - K.
#[tokio::test]
async fn test_crash_resume() {
    // Arrange
    let names = ["a", "b", "c", "d", "e"];
    let mut client = MockTimelineClient::new();
    for name in names {
        client = client.with_timeline(handle(name), 1..=10);
    }
    let store = MemoryLedgerStore::failing_after(2);
    let sink = MemorySink::new();
    let service = HarvestService::new(client.clone(), sink.clone());
    let requested = targets(&names);

    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    assert!(service.run(&requested, &mut ledger).await.is_err());

    // Act
    store.heal();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let done: BTreeSet<Identity> = ledger.entries().keys().cloned().collect();
    let work_set = ledger.compute_work_set(&requested, RetryPolicy::SkipProcessed);
    let requests_before = client.page_requests().len();
    let summary = service.run(&requested, &mut ledger).await.unwrap();

    // Assert
    assert_eq!(done.len(), 2);
    assert_eq!(work_set, requested.difference(&done).cloned().collect());
    assert_eq!(summary.stats.skipped, 2);
    assert_eq!(summary.stats.succeeded, 3);

    let resumed: BTreeSet<Identity> = client.page_requests()[requests_before..]
        .iter()
        .map(|(identity, _)| identity.clone())
        .collect();
    assert_eq!(resumed, work_set);
    assert_eq!(store.len(), 5);
}

/// Validation records unknown identities as failed and never fetches them.
#[tokio::test]
async fn test_validate_first_marks_unknown_identities() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("real"), 1..=4)
        .with_shouting_lookups();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let config = HarvestConfig::default().with_validation();
    let service = HarvestService::with_config(client.clone(), MemorySink::new(), config);

    // Act
    let summary = service
        .run(&targets(&["real", "ghost"]), &mut ledger)
        .await
        .unwrap();

    // Assert
    assert_eq!(client.lookup_sizes(), vec![2]);
    assert!(client.requests_for(&handle("ghost")).is_empty());
    assert_eq!(summary.stats.invalid, 1);
    assert_eq!(summary.stats.succeeded, 1);
    assert!(summary.invalid.contains(&handle("ghost")));

    let entry = store.get(&handle("ghost")).unwrap();
    assert!(entry.failed);
    assert_eq!(entry.error_message.as_deref(), Some(NOT_FOUND_MESSAGE));
}

/// Mixed address modes are rejected before any request.
#[tokio::test]
async fn test_mixed_modes_rejected_before_work() {
    // Arrange
    let client = MockTimelineClient::new().with_timeline(handle("a"), 1..=3);
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let config = HarvestConfig::default().with_validation();
    let service = HarvestService::with_config(client.clone(), MemorySink::new(), config);
    let requested = BTreeSet::from([handle("a"), Identity::Id(42)]);

    // Act
    let result = service.run(&requested, &mut ledger).await;

    // Assert
    assert!(matches!(result, Err(AppError::MixedAddressMode)));
    assert!(client.page_requests().is_empty());
    assert!(client.lookup_sizes().is_empty());
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let mut ledger = ProgressLedger::load(MemoryLedgerStore::new()).await.unwrap();
    let service = HarvestService::new(MockTimelineClient::new(), MemorySink::new());

    let result = service.run(&BTreeSet::new(), &mut ledger).await;

    assert!(matches!(result, Err(AppError::EmptyBatch)));
}

#[tokio::test]
async fn test_invalid_page_size_rejected() {
    let mut ledger = ProgressLedger::load(MemoryLedgerStore::new()).await.unwrap();
    let config = HarvestConfig::default().with_page_size(500);
    let service = HarvestService::with_config(MockTimelineClient::new(), MemorySink::new(), config);

    let result = service.run(&targets(&["a"]), &mut ledger).await;

    assert!(matches!(result, Err(AppError::ConfigError(_))));
}

/// Concurrent runs keep each identity's items contiguous in the sink.
#[tokio::test]
async fn test_concurrent_harvest_keeps_appends_whole() {
    // Arrange
    let names: Vec<String> = (0..12).map(|i| format!("user{}", i)).collect();
    let mut client = MockTimelineClient::new();
    for (i, name) in names.iter().enumerate() {
        client = client.with_timeline(handle(name), 1..=(50 + i as u64 * 40));
    }
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let config = HarvestConfig::default().with_concurrency(4);
    let service = HarvestService::with_config(client, sink.clone(), config);
    let requested: BTreeSet<Identity> = names.iter().map(|n| handle(n)).collect();

    // Act
    let summary = service.run(&requested, &mut ledger).await.unwrap();

    // Assert
    assert_eq!(summary.stats.succeeded, 12);
    assert_eq!(store.len(), 12);
    assert_eq!(sink.append_count(), 12);
    assert_eq!(sink.flush_count(), 1);

    let authors: Vec<Identity> = sink.items().into_iter().map(|i| i.author).collect();
    let mut runs = authors.clone();
    runs.dedup();
    assert_eq!(runs.len(), 12, "each identity's items must be contiguous");
}

/// Numeric ids are harvested the same way as handles.
#[tokio::test]
async fn test_harvest_by_numeric_id() {
    // Arrange
    let target = Identity::Id(783214);
    let client = MockTimelineClient::new().with_timeline(target.clone(), [10, 20, 30]);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client, sink.clone());

    // Act
    service
        .run(&BTreeSet::from([target.clone()]), &mut ledger)
        .await
        .unwrap();

    // Assert
    assert_eq!(sink.items(), vec![
        make_item(&target, 30),
        make_item(&target, 20),
        make_item(&target, 10),
    ]);
    assert_eq!(store.get(&target).unwrap().last_seen_id, Some(30));
}

/// Hand-built identities are canonicalized before the ledger is consulted.
#[tokio::test]
async fn test_uncanonical_handles_share_ledger_entry() {
    // Arrange
    let client = MockTimelineClient::new()
        .with_timeline(handle("nasa"), 1..=10)
        .with_timeline(handle("esa"), 1..=5);
    let sink = MemorySink::new();
    let store = MemoryLedgerStore::new();
    store.seed(handle("nasa"), LedgerEntry::succeeded(Some(10)));
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), sink.clone());
    let requested = BTreeSet::from([
        Identity::Handle("@NASA".to_string()),
        Identity::Handle(" Esa ".to_string()),
    ]);

    // Act
    let summary = service.run(&requested, &mut ledger).await.unwrap();

    // Assert
    assert_eq!(summary.skipped, BTreeSet::from([handle("nasa")]));
    assert!(client.requests_for(&handle("nasa")).is_empty());
    assert_eq!(client.requests_for(&handle("esa")).len(), 1);
    assert!(store.get(&handle("esa")).is_some());
    assert!(store.get(&Identity::Handle(" Esa ".to_string())).is_none());
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_blank_handle_rejected_before_work() {
    let client = MockTimelineClient::new().with_timeline(handle("a"), 1..=3);
    let store = MemoryLedgerStore::new();
    let mut ledger = ProgressLedger::load(store.clone()).await.unwrap();
    let service = HarvestService::new(client.clone(), MemorySink::new());
    let requested = BTreeSet::from([handle("a"), Identity::Handle("@".to_string())]);

    let result = service.run(&requested, &mut ledger).await;

    assert!(matches!(result, Err(AppError::InvalidIdentity(_))));
    assert!(client.page_requests().is_empty());
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_result_states_are_terminal() {
    let client = MockTimelineClient::new()
        .with_timeline(handle("ok"), 1..=3)
        .with_failure(handle("bad"), TransportErrorKind::ServerError, "over capacity");
    let mut ledger = ProgressLedger::load(MemoryLedgerStore::new()).await.unwrap();
    let service = HarvestService::new(client, MemorySink::new());

    let summary = service
        .run(&targets(&["ok", "bad"]), &mut ledger)
        .await
        .unwrap();

    assert_eq!(
        summary.result(&handle("ok")).unwrap().state,
        IdentityState::Succeeded
    );
    assert_eq!(
        summary.result(&handle("bad")).unwrap().state,
        IdentityState::Failed
    );
    assert!(summary.results.iter().all(|r| r.state.is_terminal()));
}
