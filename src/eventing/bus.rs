use super::{DomainEvent, EventEnvelope, EventMeta};
use crate::clock::Clock;
use crate::context::AppContext;
use crate::db::Database;
use crate::error::{AppResult, ErrorCode, OrFatal};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of each subscriber channel.
const SUBSCRIBER_BUFFER: usize = 1;

#[derive(Default)]
struct Subscribers {
    by_source: HashMap<String, Vec<mpsc::Sender<EventEnvelope>>>,
    closed: bool,
}

impl Subscribers {
    fn deliver(&self, envelope: &EventEnvelope) {
        let Some(channels) = self.by_source.get(&envelope.source_type) else {
            return;
        };
        for tx in channels {
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        event_id = envelope.id,
                        source_type = %envelope.source_type,
                        "Subscriber lagging, event not delivered"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

pub struct EventBus {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    subscribers: RwLock<Subscribers>,
}

/// Deferred fan-out returned by [`EventBus::publish_tx`]. Call
/// [`PublishContinuation::deliver`] after the transaction commits; dropping
/// it (on rollback) means no subscriber ever sees the event.
#[must_use = "call deliver() after the transaction commits"]
pub struct PublishContinuation<'a> {
    bus: &'a EventBus,
    envelope: EventEnvelope,
}

impl PublishContinuation<'_> {
    pub fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    pub fn deliver(self) {
        let subs = self.bus.subscribers.read().unwrap();
        if !subs.closed {
            subs.deliver(&self.envelope);
        }
    }
}

impl EventBus {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            subscribers: RwLock::new(Subscribers::default()),
        }
    }

    /// Registers a new subscriber for events whose `source_type` is `source`.
    pub fn subscribe(&self, source: &str) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subs = self.subscribers.write().unwrap();
        if subs.closed {
            // Dropping tx hands back an already-closed receiver
            return rx;
        }
        let channels = subs.by_source.entry(source.to_string()).or_default();
        channels.retain(|c| !c.is_closed());
        channels.push(tx);
        debug!(source = %source, subscribers = channels.len(), "Subscribed");
        rx
    }

    /// Appends the event to the log and fans it out immediately.
    pub fn publish<E: DomainEvent>(
        &self,
        ctx: &AppContext,
        event: &E,
        meta: EventMeta,
    ) -> AppResult<EventEnvelope> {
        ctx.check()?;
        // Lock order is connection then subscribers, same as publish_tx callers.
        // Holding the connection through fan-out keeps delivery in id order.
        let conn = self.db.conn();
        let subs = self.subscribers.read().unwrap();
        if subs.closed {
            return Err(ErrorCode::BusClosed.into());
        }

        let envelope = self.append(ctx, &conn, event, meta)?;
        subs.deliver(&envelope);
        Ok(envelope)
    }

    /// Appends the event inside the caller's transaction. Fan-out happens
    /// only when the returned continuation is delivered.
    pub fn publish_tx<E: DomainEvent>(
        &self,
        ctx: &AppContext,
        event: &E,
        meta: EventMeta,
        tx: &rusqlite::Transaction<'_>,
    ) -> AppResult<PublishContinuation<'_>> {
        ctx.check()?;
        if self.subscribers.read().unwrap().closed {
            return Err(ErrorCode::BusClosed.into());
        }

        let envelope = self.append(ctx, tx, event, meta)?;
        Ok(PublishContinuation {
            bus: self,
            envelope,
        })
    }

    /// Marks the bus closed and closes every subscriber channel.
    pub fn close(&self) {
        let mut subs = self.subscribers.write().unwrap();
        if !subs.closed {
            subs.closed = true;
            subs.by_source.clear();
            debug!("Event bus closed");
        }
    }

    /// Persisted envelopes for `source_type`, oldest first.
    pub fn history(&self, ctx: &AppContext, source_type: &str) -> AppResult<Vec<EventEnvelope>> {
        ctx.check()?;
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, event_type, event_version, source_type, source_id,
                       user_id, created_at, causation_id, correlation_id, data
                FROM event_log
                WHERE source_type = ?1
                ORDER BY id ASC
                "#,
            )
            .or_fatal("Failed to prepare event history query")?;

        let rows = stmt
            .query_map([source_type], |row| {
                Ok((
                    EventEnvelope {
                        id: row.get(0)?,
                        event_type: row.get(1)?,
                        event_version: row.get(2)?,
                        source_type: row.get(3)?,
                        source_id: row.get(4)?,
                        user_id: row.get(5)?,
                        created_at: row.get(6)?,
                        causation_id: row.get(7)?,
                        correlation_id: row.get(8)?,
                        data: serde_json::Value::Null,
                    },
                    row.get::<_, String>(9)?,
                ))
            })
            .or_fatal("Failed to query event history")?;

        let mut envelopes = Vec::new();
        for row in rows {
            let (mut envelope, data) = row.or_fatal("Failed to read event row")?;
            envelope.data = serde_json::from_str(&data).or_fatal("Corrupted event payload")?;
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    fn append<E: DomainEvent>(
        &self,
        ctx: &AppContext,
        conn: &Connection,
        event: &E,
        meta: EventMeta,
    ) -> AppResult<EventEnvelope> {
        let data = serde_json::to_value(event).or_fatal("Failed to serialize event")?;
        let mut envelope = EventEnvelope {
            id: 0,
            event_type: E::EVENT_TYPE.to_string(),
            event_version: meta.event_version,
            source_type: meta.source_type,
            source_id: meta.source_id,
            user_id: ctx.user_id().to_string(),
            created_at: self.clock.now_unix(),
            causation_id: ctx.causation_id().to_string(),
            correlation_id: ctx.correlation_id().to_string(),
            data,
        };

        conn.execute(
            r#"
            INSERT INTO event_log (
                event_type, event_version, source_type, source_id, user_id,
                created_at, causation_id, correlation_id, data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                envelope.event_type,
                envelope.event_version,
                envelope.source_type,
                envelope.source_id,
                envelope.user_id,
                envelope.created_at,
                envelope.causation_id,
                envelope.correlation_id,
                envelope.data.to_string(),
            ],
        )
        .or_fatal("Failed to append event")?;

        envelope.id = conn.last_insert_rowid();
        debug!(
            event_id = envelope.id,
            event_type = %envelope.event_type,
            source_id = %envelope.source_id,
            "Event appended"
        );
        Ok(envelope)
    }
}
