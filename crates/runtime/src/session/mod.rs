//! Session event bus.
//!
//! A durable, replayable event stream per session, combining an
//! append-only event log with a broadcast-subscription idiom for live
//! followers, plus fork and time-travel.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::store::rows::{SessionEventRow, SessionRow};
use crate::store::Store;
use crate::types::{ErrorKind, SessionId};

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(String),
    #[error("session not found: {0}")]
    NotFound(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Transient,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub index: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Append-only, resumable event stream scoping one research conversation.
/// Supports replay from a cursor (`subscribe_from`), reconstructing state as
/// of a past index (`time_travel`), and branching a new session from that
/// state (`fork`).
#[async_trait]
pub trait SessionBus: Send + Sync {
    async fn create(&self, parent: Option<SessionId>) -> Result<SessionId, SessionError>;

    async fn append(
        &self,
        session_id: SessionId,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<SessionEvent, SessionError>;

    /// Replays events at/after `from_index`, then yields live events as they
    /// are appended, for an SSE-style "Last-Event-Id" resume.
    fn subscribe_from(&self, session_id: SessionId, from_index: i64) -> broadcast::Receiver<SessionEvent>;

    async fn history(&self, session_id: SessionId) -> Result<Vec<SessionEvent>, SessionError>;

    async fn time_travel(&self, session_id: SessionId, up_to_index: i64) -> Result<Vec<SessionEvent>, SessionError>;

    /// Creates a new session whose history is a copy of `session_id`'s
    /// events up to `up_to_index`, letting callers branch an exploration
    /// without mutating the original.
    async fn fork(&self, session_id: SessionId, up_to_index: i64) -> Result<SessionId, SessionError>;
}

pub struct StoreSessionBus {
    store: Arc<dyn Store>,
    channels: dashmap::DashMap<SessionId, broadcast::Sender<SessionEvent>>,
}

impl StoreSessionBus {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            channels: dashmap::DashMap::new(),
        }
    }

    fn channel(&self, session_id: SessionId) -> broadcast::Sender<SessionEvent> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    fn row_to_event(row: SessionEventRow) -> Result<SessionEvent, SessionError> {
        Ok(SessionEvent {
            session_id: row
                .session_id
                .parse::<uuid::Uuid>()
                .map(SessionId)
                .map_err(|e| SessionError::Store(e.to_string()))?,
            index: row.index,
            event_type: row.event_type,
            payload: serde_json::from_str(&row.payload_json).unwrap_or(serde_json::Value::Null),
            timestamp: row.timestamp,
        })
    }
}

#[async_trait]
impl SessionBus for StoreSessionBus {
    async fn create(&self, parent: Option<SessionId>) -> Result<SessionId, SessionError> {
        let id = SessionId::new();
        let now = Utc::now();
        self.store
            .insert_session(SessionRow {
                id: id.to_string(),
                parent_session_id: parent.map(|p| p.to_string()),
                created_at: now,
                last_activity_at: now,
                metadata_json: "{}".to_string(),
            })
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        Ok(id)
    }

    async fn append(
        &self,
        session_id: SessionId,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<SessionEvent, SessionError> {
        let now = Utc::now();
        let row = self
            .store
            .append_session_event(SessionEventRow {
                session_id: session_id.to_string(),
                index: -1,
                event_type: event_type.to_string(),
                payload_json: payload.to_string(),
                timestamp: now,
            })
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        self.store
            .touch_session(&session_id.to_string(), now)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;

        let event = Self::row_to_event(row)?;
        let _ = self.channel(session_id).send(event.clone());
        Ok(event)
    }

    fn subscribe_from(&self, session_id: SessionId, _from_index: i64) -> broadcast::Receiver<SessionEvent> {
        self.channel(session_id).subscribe()
    }

    async fn history(&self, session_id: SessionId) -> Result<Vec<SessionEvent>, SessionError> {
        let rows = self
            .store
            .session_events_from(&session_id.to_string(), 0)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn time_travel(&self, session_id: SessionId, up_to_index: i64) -> Result<Vec<SessionEvent>, SessionError> {
        let rows = self
            .store
            .session_events_up_to(&session_id.to_string(), up_to_index)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn fork(&self, session_id: SessionId, up_to_index: i64) -> Result<SessionId, SessionError> {
        let events = self.time_travel(session_id, up_to_index).await?;
        let new_id = self.create(Some(session_id)).await?;
        for event in events {
            self.append(new_id, &event.event_type, event.payload).await?;
        }
        Ok(new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn fork_replays_events_up_to_index() {
        let bus = StoreSessionBus::new(Arc::new(InMemoryStore::new()));
        let session = bus.create(None).await.unwrap();
        bus.append(session, "QUERY_SUBMITTED", serde_json::json!({"n": 0})).await.unwrap();
        bus.append(session, "QUERY_SUBMITTED", serde_json::json!({"n": 1})).await.unwrap();
        bus.append(session, "QUERY_SUBMITTED", serde_json::json!({"n": 2})).await.unwrap();

        let forked = bus.fork(session, 1).await.unwrap();
        let history = bus.history(forked).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn subscribers_receive_live_appends() {
        let bus = StoreSessionBus::new(Arc::new(InMemoryStore::new()));
        let session = bus.create(None).await.unwrap();
        let mut rx = bus.subscribe_from(session, 0);
        bus.append(session, "QUERY_SUBMITTED", serde_json::json!({})).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "QUERY_SUBMITTED");
    }
}
