//! Session store: the only owner of chat session records
//!
//! Every mutation is an atomic, status-validated operation. Callers hold
//! session ids, never long-lived copies; a copy returned by `get` is a
//! snapshot and must not be written back.

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::error::ChatResult;
use crate::models::{ChatSession, EndReason, Gender, HistoryPage, MatchRequest, Message, Report};

pub mod memory;
pub mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new Waiting session with the requester as sole participant
    async fn create_waiting(&self, request: &MatchRequest) -> ChatResult<ChatSession>;

    /// Snapshot of a session including its messages
    async fn get(&self, session_id: Uuid) -> ChatResult<Option<ChatSession>>;

    /// Waiting -> Active compare-and-swap adding `user_id` as second participant.
    ///
    /// Fails with `SessionNotActive` if the session is no longer Waiting, so
    /// at most one concurrent attach can succeed.
    async fn attach(&self, session_id: Uuid, user_id: Uuid, gender: Gender)
    -> ChatResult<ChatSession>;

    /// Append a message; fails with `SessionNotActive` unless Active at append time
    async fn append_message(&self, session_id: Uuid, sender_id: Uuid, text: &str)
    -> ChatResult<Message>;

    /// Waiting|Active -> Ended. Returns `None` when the session had already ended.
    async fn end(&self, session_id: Uuid, reason: EndReason) -> ChatResult<Option<ChatSession>>;

    /// The user's Waiting or Active session, if any
    async fn open_session_for(&self, user_id: Uuid) -> ChatResult<Option<ChatSession>>;

    /// Sessions the user took part in, newest first
    async fn history(&self, user_id: Uuid, page: u32, limit: u32) -> ChatResult<HistoryPage>;

    async fn record_report(&self, report: &Report) -> ChatResult<()>;
}

/// Read a session, retrying once on a storage failure.
pub async fn get_with_retry(
    store: &dyn SessionStore,
    session_id: Uuid,
) -> ChatResult<Option<ChatSession>> {
    match store.get(session_id).await {
        Err(err) if err.is_retryable() => {
            warn!(session_id = %session_id, error = %err, "Session read failed, retrying once");
            store.get(session_id).await
        }
        other => other,
    }
}

/// `open_session_for` with the same single retry as `get_with_retry`.
pub async fn open_session_with_retry(
    store: &dyn SessionStore,
    user_id: Uuid,
) -> ChatResult<Option<ChatSession>> {
    match store.open_session_for(user_id).await {
        Err(err) if err.is_retryable() => {
            warn!(user_id = %user_id, error = %err, "Open session lookup failed, retrying once");
            store.open_session_for(user_id).await
        }
        other => other,
    }
}
