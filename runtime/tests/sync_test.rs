//! Integration tests for the per-session sync context

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use agora_core::{EngagementFilter, EngagementKind, PostId, Rating, UserId};
use agora_runtime::AgoraSync;
use agora_testing::builders::TEST_USER;
use agora_testing::{MockAgoraApi, test_clock};
use std::sync::Arc;

fn sync() -> AgoraSync<MockAgoraApi> {
    AgoraSync::new(Arc::new(MockAgoraApi::new()), UserId::new(TEST_USER))
        .with_clock(Arc::new(test_clock()))
}

#[test]
fn test_services_are_created_on_first_use_and_shared() {
    let sync = sync();
    assert!(!sync.is_initialized(EngagementKind::CookLog));

    let first = Arc::clone(sync.engagement(EngagementKind::CookLog));
    let second = Arc::clone(sync.engagement(EngagementKind::CookLog));

    assert!(sync.is_initialized(EngagementKind::CookLog));
    assert!(!sync.is_initialized(EngagementKind::Quote));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.kind(), EngagementKind::CookLog);
}

#[test]
fn test_category_manager_creates_its_engagement_service() {
    let sync = sync();

    let manager = sync.categories(EngagementKind::WatchLog);

    assert_eq!(manager.kind(), EngagementKind::WatchLog);
    assert!(sync.is_initialized(EngagementKind::WatchLog));
}

#[tokio::test]
async fn test_kinds_do_not_share_records() {
    let sync = sync();
    let post = PostId::new("p1");

    sync.engagement(EngagementKind::Bookshelf)
        .rate(&post, Rating::new(4))
        .await;

    assert!(sync.engagement(EngagementKind::Bookshelf).view(&post).is_some());
    assert!(sync.engagement(EngagementKind::ReadLog).view(&post).is_none());
}

#[tokio::test]
async fn test_reset_clears_every_created_store() {
    let sync = sync();
    let post = PostId::new("p1");
    let shelf = sync.engagement(EngagementKind::Bookshelf);
    shelf.rate(&post, Rating::new(4)).await;
    shelf.load_mine(EngagementFilter::all()).await.unwrap();
    sync.categories(EngagementKind::Bookshelf)
        .create("Favorites")
        .await
        .unwrap();

    sync.reset();

    assert!(shelf.view(&post).is_none());
    assert!(!shelf.mine().loaded);
    assert!(sync.categories(EngagementKind::Bookshelf).categories().is_empty());
}
