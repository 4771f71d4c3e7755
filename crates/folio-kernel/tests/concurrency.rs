//! Integration tests for racing writers, access resolution and relay isolation
//!
//! Each test builds the full stack (SQLite store, flow bus, resolver, guard)
//! on a fresh temp-file database so concurrent tasks really share rows.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use folio_kernel::{
    AccessResolver, ConcurrencyGuard, EventBus, EventPublisher, FlowBus, PageError, RelayFrame,
    ShareLinkStore, SqliteStore, spawn_relay,
};
use folio_types::{AccessLevel, BlockInput, ChangeEvent, Decoded, Grant, PageId};

struct Harness {
    _dir: TempDir,
    store: Arc<SqliteStore>,
    bus: Arc<FlowBus>,
    resolver: AccessResolver,
    guard: ConcurrencyGuard,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("folio.db")).unwrap());
    let bus = Arc::new(FlowBus::new(256));
    let resolver = AccessResolver::new(store.clone(), store.clone());
    let guard = ConcurrencyGuard::new(store.clone(), EventPublisher::new(bus.clone()));
    Harness {
        _dir: dir,
        store,
        bus,
        resolver,
        guard,
    }
}

fn text(s: &str) -> BlockInput {
    BlockInput::new("text", json!({ "text": s }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_exactly_one_wins() {
    let h = harness();

    for round in 0..10 {
        let page = h.guard.create_page(Some("owner"), None, Vec::new()).await.unwrap();
        let v0 = page.updated_at;

        let mut tasks = Vec::new();
        for writer in 0..8 {
            let guard = h.guard.clone();
            tasks.push(tokio::spawn(async move {
                guard
                    .replace_blocks(page.id, vec![text(&format!("r{round}w{writer}"))], Some(v0))
                    .await
            }));
        }

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(page) => winners.push(page),
                Err(PageError::Conflict) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners.len(), 1, "round {round}");
        assert_eq!(conflicts, 7, "round {round}");
        let winner = &winners[0];
        assert_ne!(winner.updated_at, v0);

        let current = h.guard.current(page.id).await.unwrap();
        assert_eq!(&current, winner);
        assert_eq!(current.blocks.len(), 1);
    }
}

#[tokio::test]
async fn test_stale_write_scenario() {
    let h = harness();
    let page = h.guard.create_page(Some("owner"), Some("Scenario"), Vec::new()).await.unwrap();
    let v0 = page.updated_at;

    let at_v1 = h
        .guard
        .replace_blocks(page.id, vec![text("b1")], Some(v0))
        .await
        .unwrap();

    let err = h
        .guard
        .replace_blocks(page.id, vec![text("b2")], Some(v0))
        .await
        .unwrap_err();
    assert!(matches!(err, PageError::Conflict));

    let current = h.guard.current(page.id).await.unwrap();
    assert_eq!(current.updated_at, at_v1.updated_at);
    assert_eq!(current.blocks[0].payload, json!({ "text": "b1" }));
}

#[tokio::test]
async fn test_force_write_always_lands() {
    let h = harness();
    let page = h.guard.create_page(Some("owner"), None, Vec::new()).await.unwrap();

    let mut latest = page.updated_at;
    for i in 0..5 {
        latest = h
            .guard
            .replace_blocks(page.id, vec![text(&i.to_string())], None)
            .await
            .unwrap()
            .updated_at;
    }

    let forced = h
        .guard
        .replace_blocks(page.id, vec![text("forced")], None)
        .await
        .unwrap();
    assert!(forced.updated_at > latest);
    assert_eq!(forced.blocks[0].payload, json!({ "text": "forced" }));
}

#[tokio::test]
async fn test_nonexistent_page_is_not_found() {
    let h = harness();
    let err = h
        .guard
        .replace_blocks(PageId::new(), vec![text("x")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, PageError::NotFound));
}

#[tokio::test]
async fn test_access_properties() {
    let h = harness();
    let page = h.guard.create_page(Some("owner"), None, Vec::new()).await.unwrap();
    let edit = h
        .store
        .create_share_link(page.id, AccessLevel::Edit, "owner".into())
        .await
        .unwrap();
    let view = h
        .store
        .create_share_link(page.id, AccessLevel::View, "owner".into())
        .await
        .unwrap();
    h.store
        .revoke_share_link(page.id, view.token.clone())
        .await
        .unwrap();

    // Owner wins with any token, even a revoked one
    for level in [AccessLevel::View, AccessLevel::Edit] {
        let access = h
            .resolver
            .resolve(Some("owner"), page.id, Some(view.token.as_str()), level)
            .await
            .unwrap();
        assert_eq!(access.grant, Grant::Owner);
    }

    // Revoked token is dead for everyone else
    let err = h
        .resolver
        .resolve(Some(""), page.id, Some(view.token.as_str()), AccessLevel::View)
        .await
        .unwrap_err();
    assert!(matches!(err, PageError::Forbidden));

    // Edit token grants edit even when only view was asked for
    let access = h
        .resolver
        .resolve(Some(""), page.id, Some(edit.token.as_str()), AccessLevel::View)
        .await
        .unwrap();
    assert_eq!(access.grant, Grant::Edit);

    // No actor, no token
    let err = h
        .resolver
        .resolve(Some(""), page.id, Some(""), AccessLevel::Edit)
        .await
        .unwrap_err();
    assert!(matches!(err, PageError::Forbidden));
}

#[tokio::test]
async fn test_typing_with_no_subscribers() {
    let h = harness();
    assert_eq!(h.bus.subscriber_count(), 0);
    h.guard
        .publisher()
        .publish_typing(PageId::new(), "session", "Amy", true)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relay_isolation_between_pages() {
    let h = harness();
    let a = h.guard.create_page(Some("owner"), Some("A"), Vec::new()).await.unwrap();
    let b = h.guard.create_page(Some("owner"), Some("B"), Vec::new()).await.unwrap();

    let bus: Arc<dyn EventBus> = h.bus.clone();
    let cancel = CancellationToken::new();
    let mut rx_a = spawn_relay(&bus, a.id, Duration::from_secs(60), cancel.clone())
        .await
        .unwrap();

    for i in 0..5 {
        h.guard
            .replace_blocks(b.id, vec![text(&format!("b{i}"))], None)
            .await
            .unwrap();
        h.guard
            .publisher()
            .publish_presence(b.id, "s", "Bo", true)
            .await
            .unwrap();
    }
    h.guard
        .replace_blocks(a.id, vec![text("for a")], None)
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), rx_a.recv())
        .await
        .unwrap()
        .unwrap();
    let RelayFrame::Event { data, .. } = frame else {
        panic!("expected event frame");
    };
    let Decoded::Event(ChangeEvent::Page(event)) = ChangeEvent::decode(data.as_bytes()) else {
        panic!("expected page event");
    };
    assert_eq!(event.page_id, a.id);
    assert_eq!(event.page.blocks[0].payload, json!({ "text": "for a" }));
    assert!(rx_a.try_recv().is_err());

    cancel.cancel();
}
