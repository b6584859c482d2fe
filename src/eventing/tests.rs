use super::*;
use crate::context::AppContext;
use crate::db::Database;
use crate::error::ErrorCode;
use crate::testing::MockClock;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ThingHappened {
    name: String,
}

impl DomainEvent for ThingHappened {
    const EVENT_TYPE: &'static str = "ThingHappened";
}

fn setup() -> (EventBus, Arc<Database>, AppContext) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let bus = EventBus::new(db.clone(), Arc::new(MockClock::new(1_700_000_000)));
    let ctx = AppContext::for_request("user-1", "test", CancellationToken::new());
    (bus, db, ctx)
}

fn thing(name: &str) -> ThingHappened {
    ThingHappened {
        name: name.to_string(),
    }
}

#[tokio::test]
async fn test_publish_persists_and_delivers() {
    let (bus, _db, ctx) = setup();
    let mut rx = bus.subscribe("Things");

    let envelope = bus
        .publish(&ctx, &thing("a"), EventMeta::new(1, "Things", "thing-1"))
        .unwrap();

    assert_eq!(envelope.event_type, "ThingHappened");
    assert_eq!(envelope.user_id, "user-1");
    assert_eq!(envelope.causation_id, ctx.causation_id());
    assert_eq!(envelope.correlation_id, ctx.correlation_id());
    assert_eq!(envelope.created_at, 1_700_000_000);

    let received = rx.recv().await.unwrap();
    assert_eq!(received, envelope);
    assert_eq!(received.payload::<ThingHappened>().unwrap(), thing("a"));
}

#[test]
fn test_envelope_keeps_context_provenance() {
    let (bus, db, _) = setup();
    let ctx = AppContext::new(
        "user-2",
        "req-1",
        "cause-1",
        "corr-1",
        CancellationToken::new(),
        tracing::Span::none(),
    );

    let envelope = bus
        .publish(&ctx, &thing("a"), EventMeta::new(1, "Things", "thing-1"))
        .unwrap();
    assert_eq!(envelope.user_id, "user-2");
    assert_eq!(envelope.causation_id, "cause-1");
    assert_eq!(envelope.correlation_id, "corr-1");

    let stored: (String, String) = db
        .conn()
        .query_row(
            "SELECT causation_id, correlation_id FROM event_log WHERE id = ?1",
            [envelope.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(stored, ("cause-1".to_string(), "corr-1".to_string()));
}

#[tokio::test]
async fn test_ids_increase_in_publish_order() {
    let (bus, _db, ctx) = setup();

    let first = bus
        .publish(&ctx, &thing("a"), EventMeta::new(1, "Things", "1"))
        .unwrap();
    let second = bus
        .publish(&ctx, &thing("b"), EventMeta::new(1, "Things", "2"))
        .unwrap();
    assert!(first.id < second.id);

    let history = bus.history(&ctx, "Things").unwrap();
    let ids: Vec<i64> = history.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[tokio::test]
async fn test_subscribers_only_see_their_source() {
    let (bus, _db, ctx) = setup();
    let mut things = bus.subscribe("Things");
    let mut others = bus.subscribe("Others");

    bus.publish(&ctx, &thing("a"), EventMeta::new(1, "Things", "1"))
        .unwrap();

    assert!(things.try_recv().is_ok());
    assert!(others.try_recv().is_err());
}

#[tokio::test]
async fn test_full_subscriber_does_not_block_publisher() {
    let (bus, _db, ctx) = setup();
    let mut rx = bus.subscribe("Things");

    for name in ["a", "b", "c"] {
        bus.publish(&ctx, &thing(name), EventMeta::new(1, "Things", name))
            .unwrap();
    }

    // Only the first fits the buffer; all three are durable
    assert_eq!(rx.recv().await.unwrap().source_id, "a");
    assert!(rx.try_recv().is_err());
    assert_eq!(bus.history(&ctx, "Things").unwrap().len(), 3);
}

#[tokio::test]
async fn test_publish_tx_delivers_after_commit() {
    let (bus, db, ctx) = setup();
    let mut rx = bus.subscribe("Things");

    {
        let mut conn = db.conn();
        let tx = conn.transaction().unwrap();
        let continuation = bus
            .publish_tx(&ctx, &thing("a"), EventMeta::new(1, "Things", "1"), &tx)
            .unwrap();
        assert!(rx.try_recv().is_err());
        tx.commit().unwrap();
        continuation.deliver();
    }

    assert_eq!(rx.recv().await.unwrap().source_id, "1");
}

#[tokio::test]
async fn test_publish_tx_rollback_is_invisible() {
    let (bus, db, ctx) = setup();
    let mut rx = bus.subscribe("Things");

    {
        let mut conn = db.conn();
        let tx = conn.transaction().unwrap();
        let continuation = bus
            .publish_tx(&ctx, &thing("a"), EventMeta::new(1, "Things", "1"), &tx)
            .unwrap();
        drop(continuation);
        tx.rollback().unwrap();
    }

    assert!(rx.try_recv().is_err());
    assert!(bus.history(&ctx, "Things").unwrap().is_empty());
}

#[tokio::test]
async fn test_close_rejects_publish_and_ends_streams() {
    let (bus, _db, ctx) = setup();
    let mut rx = bus.subscribe("Things");

    bus.close();
    bus.close();

    let err = bus
        .publish(&ctx, &thing("a"), EventMeta::new(1, "Things", "1"))
        .unwrap_err();
    assert_eq!(err, ErrorCode::BusClosed);
    assert!(rx.recv().await.is_none());

    let mut late = bus.subscribe("Things");
    assert!(late.recv().await.is_none());
}
