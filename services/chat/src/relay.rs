//! Session relay: traffic between the two participants of an active session

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::filter::ContentFilter;
use crate::matchmaker::Matchmaker;
use crate::models::{EndNotice, EndReason, Message, ServerEvent, SessionStatus};
use crate::presence::PresenceRegistry;
use crate::store::{SessionStore, get_with_retry};

pub struct SessionRelay {
    store: Arc<dyn SessionStore>,
    presence: Arc<PresenceRegistry>,
    matchmaker: Arc<Matchmaker>,
    filter: Arc<dyn ContentFilter>,
    /// Per-session lock serialising append + deliver
    ordering: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionRelay {
    pub fn new(
        store: Arc<dyn SessionStore>,
        presence: Arc<PresenceRegistry>,
        matchmaker: Arc<Matchmaker>,
        filter: Arc<dyn ContentFilter>,
    ) -> Self {
        Self {
            store,
            presence,
            matchmaker,
            filter,
            ordering: DashMap::new(),
        }
    }

    fn ordering_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.ordering.entry(session_id).or_default().value().clone()
    }

    /// Tell both participants their chat has started
    pub fn announce_started(&self, session_id: Uuid, participants: [Uuid; 2]) {
        for user_id in participants {
            self.presence
                .send_to(user_id, ServerEvent::started(session_id));
            self.presence
                .send_to(user_id, ServerEvent::ChatFound {
                    chat_id: session_id,
                });
        }
    }

    /// Filter, persist and deliver a message to both participants.
    ///
    /// Nothing is delivered unless the append succeeded.
    pub async fn relay_message(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        raw_text: &str,
    ) -> ChatResult<Message> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput(
                "Message cannot be empty".to_string(),
            ));
        }

        let session = get_with_retry(self.store.as_ref(), session_id)
            .await?
            .ok_or(ChatError::SessionNotFound)?;
        if !session.is_participant(sender_id) {
            return Err(ChatError::NotAParticipant);
        }
        if session.status != SessionStatus::Active {
            return Err(ChatError::SessionNotActive);
        }

        let cleaned = self.filter.clean(text)?;

        let lock = self.ordering_lock(session_id);
        let _guard = lock.lock().await;

        let message = match self
            .store
            .append_message(session_id, sender_id, &cleaned)
            .await
        {
            Ok(message) => message,
            Err(ChatError::SessionNotActive) => {
                // Ended after the status check; its lock may have been recreated here
                self.ordering.remove(&session_id);
                return Err(ChatError::SessionNotActive);
            }
            Err(err) => return Err(err),
        };

        self.presence
            .send_to(sender_id, ServerEvent::message(&message, true));
        if let Some(peer_id) = session.peer_of(sender_id) {
            self.presence
                .send_to(peer_id, ServerEvent::message(&message, false));
        }

        debug!(session_id = %session_id, message_id = %message.id, "Message relayed");
        Ok(message)
    }

    /// Forward a typing signal to the peer only.
    ///
    /// Returns whether a signal was queued; inactive sessions and missing
    /// peers are silently ignored.
    pub async fn relay_typing(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        typing: bool,
    ) -> ChatResult<bool> {
        let session = get_with_retry(self.store.as_ref(), session_id)
            .await?
            .ok_or(ChatError::SessionNotFound)?;
        if !session.is_participant(sender_id) {
            return Err(ChatError::NotAParticipant);
        }
        if session.status != SessionStatus::Active {
            return Ok(false);
        }

        Ok(session
            .peer_of(sender_id)
            .map(|peer_id| {
                self.presence
                    .send_to(peer_id, ServerEvent::UserTyping { typing })
            })
            .unwrap_or(false))
    }

    /// End a session on behalf of `initiator_id`.
    ///
    /// Returns the peer to notify, or `None` if there is none or the session
    /// had already ended.
    pub async fn end_session(
        &self,
        session_id: Uuid,
        initiator_id: Uuid,
        reason: EndReason,
    ) -> ChatResult<Option<Uuid>> {
        let session = get_with_retry(self.store.as_ref(), session_id)
            .await?
            .ok_or(ChatError::SessionNotFound)?;
        if !session.is_participant(initiator_id) {
            return Err(ChatError::NotAParticipant);
        }

        let Some(ended) = self.store.end(session_id, reason).await? else {
            debug!(session_id = %session_id, "Session already ended");
            return Ok(None);
        };

        self.matchmaker.cancel(session_id).await;
        for participant in &ended.participants {
            self.presence.clear_session_if(*participant, session_id);
        }
        self.ordering.remove(&session_id);

        info!(
            session_id = %session_id,
            initiator_id = %initiator_id,
            reason = reason.as_str(),
            "Session ended"
        );
        Ok(ended.peer_of(initiator_id))
    }

    pub fn notify_ended(&self, user_id: Uuid, notice: EndNotice) -> bool {
        self.presence.send_to(user_id, ServerEvent::ended(notice))
    }
}
