//! Connection gateway
//!
//! Entry point for both the realtime connections and the HTTP routes. It
//! owns the presence registry, the matchmaker and the relay, and turns their
//! results into events for the affected connections.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, ChatError, ChatResult};
use crate::filter::ContentFilter;
use crate::matchmaker::{MatchOutcome, Matchmaker};
use crate::models::{
    ClientEvent, EndNotice, EndReason, HistoryPage, MatchRequest, Report, ReportReason,
    ServerEvent, User, normalize_interests,
};
use crate::presence::{ConnectionHandle, PresenceEntry, PresenceRegistry};
use crate::relay::SessionRelay;
use crate::store::{SessionStore, get_with_retry, open_session_with_retry};
use crate::users::UserDirectory;

/// Close code sent to a connection replaced by a newer one
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// Close code sent to a connection reaped for inactivity
pub const CLOSE_IDLE: u16 = 4008;

const REPORT_SUBMITTED: &str = "Thank you for your report. We will review it shortly.";

/// How an end request maps to the notices both sides receive
fn end_notices(reason: EndReason) -> (EndNotice, EndNotice) {
    match reason {
        EndReason::UserDisconnected => (EndNotice::UserDisconnected, EndNotice::PartnerDisconnected),
        EndReason::Reported => (EndNotice::Reported, EndNotice::PartnerLeft),
        _ => (EndNotice::UserSkipped, EndNotice::PartnerLeft),
    }
}

fn parse_skip_reason(reason: Option<&str>) -> ChatResult<EndReason> {
    match reason {
        None | Some("user_skipped") => Ok(EndReason::UserSkipped),
        Some("user_disconnected") => Ok(EndReason::UserDisconnected),
        Some(_) => Err(ChatError::InvalidInput("Invalid end reason".to_string())),
    }
}

pub struct Gateway {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    presence: Arc<PresenceRegistry>,
    matchmaker: Arc<Matchmaker>,
    relay: SessionRelay,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        filter: Arc<dyn ContentFilter>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let matchmaker = Arc::new(Matchmaker::new(store.clone(), presence.clone()));
        let relay = SessionRelay::new(store.clone(), presence.clone(), matchmaker.clone(), filter);

        Self {
            store,
            users,
            presence,
            matchmaker,
            relay,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Resolve an authenticated user id into an admissible user
    pub async fn authenticate(&self, user_id: Uuid) -> ApiResult<User> {
        match self.users.find_by_id(user_id).await? {
            Some(user) if user.banned => {
                warn!(user_id = %user_id, "Banned user rejected");
                Err(ApiError::Forbidden("Account is banned".to_string()))
            }
            Some(user) => Ok(user),
            None => {
                warn!(user_id = %user_id, "Unknown user rejected");
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// Register a realtime connection, closing the one it replaces
    pub async fn connect(&self, user: &User, handle: ConnectionHandle) {
        let connection_id = handle.id();
        if let Some(replaced) = self.presence.register(user.id, handle) {
            info!(
                user_id = %user.id,
                old_connection = %replaced.id(),
                new_connection = %connection_id,
                "Connection superseded"
            );
            replaced.close(CLOSE_SUPERSEDED, "superseded");
        }

        if let Err(err) = self.users.touch(user.id, true).await {
            warn!(user_id = %user.id, error = %err, "Failed to record online status");
        }
        info!(user_id = %user.id, connection_id = %connection_id, "User connected");
    }

    /// Tear down a closed connection.
    ///
    /// Superseded connections no longer own the presence entry and leave the
    /// user's session alone.
    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid) {
        match self.presence.unregister_connection(user_id, connection_id) {
            Some(entry) => self.release(user_id, entry).await,
            None => debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Superseded connection closed"
            ),
        }
    }

    /// End whatever session the departed user held and mark them offline
    async fn release(&self, user_id: Uuid, entry: PresenceEntry) {
        let session_id = match entry.current_session {
            Some(id) => Some(id),
            None => match open_session_with_retry(self.store.as_ref(), user_id).await {
                Ok(open) => open.map(|s| s.id),
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "Open session lookup failed on disconnect");
                    None
                }
            },
        };

        if let Some(session_id) = session_id {
            match self
                .relay
                .end_session(session_id, user_id, EndReason::UserDisconnected)
                .await
            {
                Ok(Some(peer_id)) => {
                    self.relay
                        .notify_ended(peer_id, EndNotice::PartnerDisconnected);
                }
                Ok(None) => {}
                Err(err) => warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    error = %err,
                    "Failed to end session on disconnect"
                ),
            }
        }

        if let Err(err) = self.users.touch(user_id, false).await {
            warn!(user_id = %user_id, error = %err, "Failed to record offline status");
        }
        info!(user_id = %user_id, "User disconnected");
    }

    /// Dispatch one inbound realtime event.
    ///
    /// Failures are reported to `origin` only.
    pub async fn handle_event(&self, user: &User, origin: &ConnectionHandle, event: ClientEvent) {
        self.presence.touch(user.id);
        let name = event.name();

        let result = match event {
            ClientEvent::FindChat { interests } => self.find_chat(user, interests).await.map(|_| ()),
            ClientEvent::SendMessage { chat_id, message } => self
                .relay
                .relay_message(chat_id, user.id, &message)
                .await
                .map(|_| ()),
            ClientEvent::TypingStart { chat_id } => self
                .relay
                .relay_typing(chat_id, user.id, true)
                .await
                .map(|_| ()),
            ClientEvent::TypingStop { chat_id } => self
                .relay
                .relay_typing(chat_id, user.id, false)
                .await
                .map(|_| ()),
            ClientEvent::SkipChat { chat_id, reason } => {
                self.end_chat(user.id, chat_id, reason.as_deref()).await
            }
            ClientEvent::ReportUser {
                chat_id,
                reason,
                description,
            } => self
                .report_in_chat(user.id, chat_id, &reason, description)
                .await
                .map(|_| ()),
        };

        if let Err(err) = result {
            warn!(user_id = %user.id, event = name, error = %err, "Event failed");
            origin.send(ServerEvent::error(err.client_message()));
        }
    }

    /// Find a partner, falling back to the profile's interests
    pub async fn find_chat(
        &self,
        user: &User,
        interests: Option<Vec<String>>,
    ) -> ChatResult<MatchOutcome> {
        let interests = match interests {
            Some(interests) => normalize_interests(interests),
            None => user.interests.clone(),
        };

        let outcome = self
            .matchmaker
            .request_match(MatchRequest {
                user_id: user.id,
                gender: user.gender,
                preferred_gender: user.preferred_gender,
                interests,
            })
            .await?;

        match outcome {
            MatchOutcome::Attached {
                session_id,
                peer_id,
            } => self.relay.announce_started(session_id, [peer_id, user.id]),
            MatchOutcome::Waiting { session_id } => {
                self.presence
                    .send_to(user.id, ServerEvent::waiting(session_id));
            }
        }
        Ok(outcome)
    }

    /// Leave a session voluntarily (skip) or on behalf of a dropped client
    pub async fn end_chat(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        reason: Option<&str>,
    ) -> ChatResult<()> {
        let reason = parse_skip_reason(reason)?;
        self.finish(user_id, session_id, reason).await
    }

    async fn finish(&self, user_id: Uuid, session_id: Uuid, reason: EndReason) -> ChatResult<()> {
        let peer = self.relay.end_session(session_id, user_id, reason).await?;
        let (own, partner) = end_notices(reason);

        self.relay.notify_ended(user_id, own);
        if let Some(peer_id) = peer {
            self.relay.notify_ended(peer_id, partner);
        }
        Ok(())
    }

    /// Report the partner of an ongoing chat and end it
    pub async fn report_in_chat(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        reason: &str,
        description: Option<String>,
    ) -> ChatResult<Report> {
        let reason: ReportReason = reason.parse()?;

        let session = get_with_retry(self.store.as_ref(), session_id)
            .await?
            .ok_or(ChatError::SessionNotFound)?;
        if !session.is_participant(user_id) {
            return Err(ChatError::NotAParticipant);
        }
        let reported_user_id = session.peer_of(user_id).ok_or(ChatError::SessionNotActive)?;

        let report = Report::new(user_id, reported_user_id, Some(session_id), reason, description);
        self.store.record_report(&report).await?;
        info!(
            report_id = %report.id,
            session_id = %session_id,
            reported_by = %user_id,
            "Partner reported"
        );

        self.presence.send_to(
            user_id,
            ServerEvent::ReportSubmitted {
                message: REPORT_SUBMITTED.to_string(),
            },
        );
        self.finish(user_id, session_id, EndReason::Reported).await?;
        Ok(report)
    }

    /// File a report outside the realtime channel.
    ///
    /// If `chat_id` is the reporter's open session it is ended as reported.
    pub async fn report(
        &self,
        reporter_id: Uuid,
        reported_user_id: Uuid,
        chat_id: Option<Uuid>,
        reason: &str,
        description: Option<String>,
    ) -> ChatResult<Report> {
        let reason: ReportReason = reason.parse()?;
        if reporter_id == reported_user_id {
            return Err(ChatError::InvalidInput(
                "You cannot report yourself".to_string(),
            ));
        }

        let report = Report::new(reporter_id, reported_user_id, chat_id, reason, description);
        self.store.record_report(&report).await?;
        info!(report_id = %report.id, reported_by = %reporter_id, "Report filed");

        let Some(chat_id) = chat_id else {
            return Ok(report);
        };

        match get_with_retry(self.store.as_ref(), chat_id).await {
            Ok(Some(session)) if session.is_open() && session.is_participant(reporter_id) => {
                if let Err(err) = self.finish(reporter_id, chat_id, EndReason::Reported).await {
                    warn!(session_id = %chat_id, error = %err, "Failed to end reported session");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(session_id = %chat_id, error = %err, "Failed to load reported session"),
        }
        Ok(report)
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> ChatResult<HistoryPage> {
        let (page, limit) = HistoryPage::normalize(page, limit);
        match self.store.history(user_id, page, limit).await {
            Err(err) if err.is_retryable() => {
                warn!(user_id = %user_id, error = %err, "History read failed, retrying once");
                self.store.history(user_id, page, limit).await
            }
            other => other,
        }
    }

    /// Drop connections idle for longer than `timeout`
    pub async fn reap_idle(&self, timeout: Duration) -> usize {
        let mut reaped = 0;
        for user_id in self.presence.idle_users(timeout) {
            // Activity since the scan keeps the connection
            let Some(entry) = self.presence.unregister_if_idle(user_id, timeout) else {
                continue;
            };
            entry.connection.close(CLOSE_IDLE, "idle timeout");
            self.release(user_id, entry).await;
            reaped += 1;
        }

        if reaped > 0 {
            info!(reaped, "Reaped idle connections");
        }
        reaped
    }

    /// End waiting sessions whose creator is no longer connected
    pub async fn reap_orphans(&self) -> usize {
        let mut reaped = 0;
        for entry in self.matchmaker.orphans().await {
            match self
                .relay
                .end_session(entry.session_id, entry.creator_id, EndReason::UserDisconnected)
                .await
            {
                Ok(_) => reaped += 1,
                Err(err) => {
                    warn!(
                        session_id = %entry.session_id,
                        error = %err,
                        "Failed to end orphaned session"
                    );
                    // Kept for the next pass unless the failure is permanent
                    if !err.is_retryable() {
                        self.matchmaker.cancel(entry.session_id).await;
                    }
                }
            }
        }

        if reaped > 0 {
            info!(reaped, "Reaped orphaned waiting sessions");
        }
        reaped
    }

    /// End waiting sessions older than `timeout` and tell their creators
    pub async fn expire_waiting(&self, timeout: Duration) -> usize {
        let mut expired = 0;
        for entry in self.matchmaker.expired(timeout).await {
            match self
                .relay
                .end_session(entry.session_id, entry.creator_id, EndReason::UserSkipped)
                .await
            {
                Ok(_) => {
                    self.relay
                        .notify_ended(entry.creator_id, EndNotice::WaitTimeout);
                    expired += 1;
                }
                Err(err) => warn!(
                    session_id = %entry.session_id,
                    error = %err,
                    "Failed to expire waiting session"
                ),
            }
        }

        if expired > 0 {
            info!(expired, "Expired waiting sessions");
        }
        expired
    }
}
