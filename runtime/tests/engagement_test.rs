//! Integration tests for engagement services over the in-memory API
//!
//! Covers the optimistic protocol end to end: speculative values while a
//! request is held, rollback on failure, and folding confirmed records into
//! the paginated "mine" list.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use agora_core::{
    CategoryId, Cursor, EngagementFilter, EngagementKind, OptimisticSlot, Page, PostId, Rating,
    RecordId,
};
use agora_runtime::{EngagementService, LoadOutcome, MutationOutcome};
use agora_testing::builders::{in_category, rated, shelf_page, shelf_record};
use agora_testing::{EngagementCall, MockEngagementApi, server_error, test_clock, test_time};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn shelf(api: &MockEngagementApi) -> EngagementService<MockEngagementApi> {
    EngagementService::new(
        EngagementKind::Bookshelf,
        agora_core::UserId::new(agora_testing::builders::TEST_USER),
        Arc::new(api.clone()),
    )
    .with_clock(Arc::new(test_clock()))
}

fn subjects(service: &EngagementService<MockEngagementApi>) -> Vec<String> {
    service
        .mine()
        .items
        .iter()
        .map(|record| record.subject.as_str().to_string())
        .collect()
}

fn list_calls(api: &MockEngagementApi) -> usize {
    api.calls()
        .iter()
        .filter(|call| matches!(call, EngagementCall::ListMine { .. }))
        .count()
}

fn no_speculative_leak(service: &EngagementService<MockEngagementApi>) -> bool {
    let state = service.controller().snapshot();
    state
        .slots
        .iter()
        .filter(|(_, slot)| slot.is_speculative())
        .all(|(key, _)| state.in_flight.contains(key))
}

// ============================================================================
// Optimistic protocol
// ============================================================================

#[tokio::test]
async fn test_rating_failure_reverts_to_unrated() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    let post = PostId::new("p1");
    api.fail_next_upsert(server_error(500));
    api.hold_responses();

    let pending = service.rate(&post, Rating::new(4));
    tokio::pin!(pending);
    assert!(futures::poll!(pending.as_mut()).is_pending());

    // Shown immediately, before the server answers
    assert_eq!(service.view(&post).and_then(|r| r.rating), Rating::new(4));
    assert!(service.is_busy(&post));
    assert!(service.controller().slot(&post).is_speculative());

    api.release(1);
    let outcome = pending.await;

    assert!(matches!(
        outcome,
        MutationOutcome::Failed { ref message, .. } if message == "Failed to save."
    ));
    assert_eq!(service.view(&post).and_then(|r| r.rating), None);
    assert_eq!(service.controller().slot(&post), OptimisticSlot::ConfirmedOverride(None));
    assert_eq!(service.error(&post).as_deref(), Some("Failed to save."));
    assert!(!service.is_busy(&post));
}

#[tokio::test]
async fn test_success_clears_slot_and_keeps_server_record() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    let post = PostId::new("p1");

    let outcome = service.rate(&post, Rating::new(3)).await;

    let MutationOutcome::Confirmed(Some(record)) = outcome else {
        unreachable!("rating should be confirmed");
    };
    assert!(record.is_confirmed());
    assert!(service.controller().slot(&post).is_unset());
    assert_eq!(service.view(&post), Some(record));
}

#[tokio::test]
async fn test_no_speculative_slot_outlives_its_request() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    let posts: Vec<PostId> = (0..6).map(|i| PostId::new(format!("p{i}"))).collect();

    for (index, post) in posts.iter().enumerate() {
        if index % 2 == 0 {
            api.fail_next_upsert(server_error(503));
        }
        service.rate(post, Rating::new(5)).await;
        assert!(no_speculative_leak(&service));
    }
    for post in &posts {
        service.remove(post).await;
        assert!(no_speculative_leak(&service));
        assert!(!service.is_busy(post));
    }
}

#[tokio::test]
async fn test_concurrent_mutation_for_same_post_is_skipped() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    let post = PostId::new("p1");
    api.hold_responses();

    let first = service.rate(&post, Rating::new(2));
    tokio::pin!(first);
    assert!(futures::poll!(first.as_mut()).is_pending());

    let second = service.rate(&post, Rating::new(5)).await;
    assert!(matches!(second, MutationOutcome::Skipped));

    api.release(1);
    assert!(first.await.is_confirmed());
    assert_eq!(api.call_count(), 1);
    assert_eq!(service.view(&post).and_then(|r| r.rating), Rating::new(2));
}

#[tokio::test]
async fn test_abandoned_mutation_rolls_back_and_frees_post() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    let post = PostId::new("p1");
    api.hold_responses();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), service.rate(&post, Rating::new(4))).await;
    assert!(abandoned.is_err());

    assert!(!service.is_busy(&post));
    assert_eq!(service.controller().slot(&post), OptimisticSlot::ConfirmedOverride(None));
    assert!(service.view(&post).is_none());
    assert!(service.error(&post).is_none());
    assert!(no_speculative_leak(&service));

    api.release(1);
    let retry = service.rate(&post, Rating::new(2)).await;

    assert!(retry.is_confirmed());
    assert_eq!(service.view(&post).and_then(|r| r.rating), Rating::new(2));
}

#[tokio::test]
async fn test_saving_over_soft_deleted_record_keeps_identity() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    let post = PostId::new("p1");
    let mut deleted = rated(shelf_record("p1"), 2);
    deleted.deleted_at = Some(test_time());
    service
        .controller()
        .merge_confirmed([(post.clone(), deleted)]);
    assert!(service.view(&post).is_none());
    api.hold_responses();

    let pending = service.rate(&post, Rating::new(4));
    tokio::pin!(pending);
    assert!(futures::poll!(pending.as_mut()).is_pending());

    let speculative = service.view(&post).unwrap();
    assert_eq!(speculative.id, Some(RecordId::new("rec-p1")));
    assert_eq!(speculative.deleted_at, None);
    assert_eq!(speculative.rating, Rating::new(4));

    api.release(1);
    assert!(pending.await.is_confirmed());
}

#[tokio::test]
async fn test_selecting_current_rating_clears_it() {
    let api = MockEngagementApi::new().with_record(rated(shelf_record("p1"), 4));
    let service = shelf(&api);
    let post = PostId::new("p1");
    service.load_mine(EngagementFilter::all()).await.unwrap();

    service.toggle_rating(&post, Rating::new(4).unwrap()).await;

    assert_eq!(service.view(&post).and_then(|r| r.rating), None);
    assert_eq!(api.record(EngagementKind::Bookshelf, &post).unwrap().rating, None);
}

#[tokio::test]
async fn test_removing_absent_record_sends_nothing() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);

    let outcome = service.remove(&PostId::new("p1")).await;

    assert!(matches!(outcome, MutationOutcome::Noop));
    assert_eq!(api.call_count(), 0);
}

#[tokio::test]
async fn test_failed_remove_restores_record() {
    let api = MockEngagementApi::new().with_record(shelf_record("p1"));
    let service = shelf(&api);
    let post = PostId::new("p1");
    service.load_mine(EngagementFilter::all()).await.unwrap();
    api.fail_next_remove(server_error(500));

    let outcome = service.remove(&post).await;

    assert!(outcome.is_failed());
    assert_eq!(service.error(&post).as_deref(), Some("Failed to remove."));
    assert!(service.view(&post).is_some());
    assert_eq!(subjects(&service), vec!["p1"]);
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_two_pages_append_in_order() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    api.push_page(Ok(shelf_page(&["A", "B"], Some("c1"))));
    api.push_page(Ok(shelf_page(&["C"], None)));

    service.load_mine(EngagementFilter::all()).await.unwrap();
    assert!(service.mine().has_more());
    service.load_more().await.unwrap();

    assert_eq!(subjects(&service), vec!["A", "B", "C"]);
    assert!(!service.mine().has_more());
    assert_eq!(service.load_more().await.unwrap(), LoadOutcome::Exhausted);

    let cursors: Vec<Option<Cursor>> = api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EngagementCall::ListMine { cursor, .. } => Some(cursor),
            _ => None,
        })
        .collect();
    assert_eq!(cursors, vec![None, Some(Cursor::new("c1"))]);
}

#[tokio::test]
async fn test_reloading_first_page_does_not_duplicate() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    api.push_page(Ok(shelf_page(&["A", "B"], Some("c1"))));
    api.push_page(Ok(shelf_page(&["A", "B"], Some("c1"))));

    service.load_mine(EngagementFilter::all()).await.unwrap();
    service.load_mine(EngagementFilter::all()).await.unwrap();

    assert_eq!(subjects(&service), vec!["A", "B"]);
}

#[tokio::test]
async fn test_failed_page_keeps_loaded_items() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    api.push_page(Ok(shelf_page(&["A"], Some("c1"))));
    api.push_page(Err(server_error(500)));

    service.load_mine(EngagementFilter::all()).await.unwrap();
    assert!(service.load_more().await.is_err());

    let mine = service.mine();
    assert_eq!(subjects(&service), vec!["A"]);
    assert_eq!(mine.error.as_deref(), Some("Failed to load."));
    assert!(mine.has_more());
}

#[tokio::test]
async fn test_second_load_while_in_flight_is_skipped() {
    let api = MockEngagementApi::new().with_record(shelf_record("p1"));
    let service = shelf(&api);
    api.hold_responses();

    let first = service.load_mine(EngagementFilter::all());
    tokio::pin!(first);
    assert!(futures::poll!(first.as_mut()).is_pending());

    let second = service.load_mine(EngagementFilter::all()).await.unwrap();
    assert_eq!(second, LoadOutcome::Skipped);
    assert_eq!(list_calls(&api), 1);

    api.release(1);
    assert!(matches!(first.await.unwrap(), LoadOutcome::Loaded { .. }));
    assert_eq!(subjects(&service), vec!["p1"]);
}

#[tokio::test]
async fn test_page_for_previous_filter_is_discarded() {
    let api = MockEngagementApi::new();
    let service = shelf(&api);
    api.push_page(Ok(shelf_page(&["A", "B"], None)));
    api.push_page(Ok(shelf_page(&["C"], None)));
    api.hold_responses();

    let all = service.load_mine(EngagementFilter::all());
    tokio::pin!(all);
    assert!(futures::poll!(all.as_mut()).is_pending());
    let favorites = service.load_mine(EngagementFilter::category(CategoryId::new("fav_id")));
    tokio::pin!(favorites);
    assert!(futures::poll!(favorites.as_mut()).is_pending());

    api.release(2);

    assert_eq!(all.await.unwrap(), LoadOutcome::Stale);
    assert!(matches!(favorites.await.unwrap(), LoadOutcome::Loaded { .. }));
    assert_eq!(subjects(&service), vec!["C"]);
    assert!(service.view(&PostId::new("A")).is_none());
}

#[tokio::test]
async fn test_page_arriving_after_reset_is_discarded() {
    let api = MockEngagementApi::new().with_record(shelf_record("p1"));
    let service = shelf(&api);
    api.hold_responses();

    let pending = service.load_mine(EngagementFilter::all());
    tokio::pin!(pending);
    assert!(futures::poll!(pending.as_mut()).is_pending());

    service.reset();
    api.release(1);

    assert_eq!(pending.await.unwrap(), LoadOutcome::Stale);
    assert!(service.mine().items.is_empty());
    assert!(!service.mine().loaded);
    assert!(service.view(&PostId::new("p1")).is_none());
}

#[tokio::test]
async fn test_abandoned_load_does_not_block_later_loads() {
    let api = MockEngagementApi::new().with_record(shelf_record("p1"));
    let service = shelf(&api);
    api.hold_responses();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), service.load_mine(EngagementFilter::all()))
            .await;
    assert!(abandoned.is_err());
    assert!(!service.mine().loading);

    api.release(1);
    let outcome = service.load_mine(EngagementFilter::all()).await.unwrap();

    assert!(matches!(outcome, LoadOutcome::Loaded { .. }));
    assert_eq!(subjects(&service), vec!["p1"]);
    assert_eq!(list_calls(&api), 2);
}

#[tokio::test]
async fn test_page_fetched_before_save_does_not_overwrite_it() {
    let api = MockEngagementApi::new().with_record(rated(shelf_record("p1"), 3));
    let service = shelf(&api);
    let post = PostId::new("p1");
    api.push_page(Ok(Page::new(vec![rated(shelf_record("p1"), 3)], None)));
    api.hold_responses();

    let load = service.load_mine(EngagementFilter::all());
    tokio::pin!(load);
    assert!(futures::poll!(load.as_mut()).is_pending());
    let save = service.rate(&post, Rating::new(5));
    tokio::pin!(save);
    assert!(futures::poll!(save.as_mut()).is_pending());

    api.release(2);
    assert!(save.await.is_confirmed());
    assert!(matches!(load.await.unwrap(), LoadOutcome::Loaded { .. }));

    assert_eq!(service.view(&post).and_then(|r| r.rating), Rating::new(5));
    assert_eq!(service.mine().items[0].rating, Rating::new(5));
    assert_eq!(
        api.record(EngagementKind::Bookshelf, &post).unwrap().rating,
        Rating::new(5)
    );

    // A page fetched after the save is merged as usual
    api.release(1);
    service.refresh_mine().await.unwrap();
    assert_eq!(service.view(&post).and_then(|r| r.rating), Rating::new(5));
    assert!(service.controller().slot(&post).is_unset());
}

#[tokio::test]
async fn test_loaded_records_become_visible() {
    let api = MockEngagementApi::new().with_record(rated(shelf_record("p1"), 5));
    let service = shelf(&api);

    service.load_mine(EngagementFilter::all()).await.unwrap();

    assert_eq!(
        service.view(&PostId::new("p1")).and_then(|r| r.rating),
        Rating::new(5)
    );
}

// ============================================================================
// Mine collection sync
// ============================================================================

#[tokio::test]
async fn test_new_save_is_prepended_to_mine() {
    let api = MockEngagementApi::new().with_record(shelf_record("old"));
    let service = shelf(&api);
    service.load_mine(EngagementFilter::all()).await.unwrap();

    service
        .set_notes(&PostId::new("new"), Some("Loved it".to_string()))
        .await;

    assert_eq!(subjects(&service), vec!["new", "old"]);
}

#[tokio::test]
async fn test_moving_out_of_filtered_category_drops_from_mine() {
    let api = MockEngagementApi::new()
        .with_record(in_category(shelf_record("p1"), "catA_id"))
        .with_record(in_category(shelf_record("p2"), "catA_id"));
    let service = shelf(&api);
    let filter = EngagementFilter::category(CategoryId::new("catA_id"));
    service.load_mine(filter).await.unwrap();
    assert_eq!(service.mine().items.len(), 2);

    service.set_category(&PostId::new("p1"), None).await;

    assert_eq!(subjects(&service), vec!["p2"]);
}

#[tokio::test]
async fn test_remove_drops_from_mine() {
    let api = MockEngagementApi::new().with_record(shelf_record("p1"));
    let service = shelf(&api);
    service.load_mine(EngagementFilter::all()).await.unwrap();

    assert!(service.remove(&PostId::new("p1")).await.is_confirmed());

    assert!(service.mine().items.is_empty());
    assert!(service.view(&PostId::new("p1")).is_none());
}
