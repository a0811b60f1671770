//! Chat session model and its state machine
//!
//! `Waiting --(attach)--> Active --(skip | disconnect | report)--> Ended`.
//! A waiting session may also be ended directly. `Ended` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::user::{Gender, PreferredGender};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserSkipped,
    UserDisconnected,
    PartnerLeft,
    PartnerDisconnected,
    Reported,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::UserSkipped => "user_skipped",
            EndReason::UserDisconnected => "user_disconnected",
            EndReason::PartnerLeft => "partner_left",
            EndReason::PartnerDisconnected => "partner_disconnected",
            EndReason::Reported => "reported",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_skipped" => Ok(EndReason::UserSkipped),
            "user_disconnected" => Ok(EndReason::UserDisconnected),
            "partner_left" => Ok(EndReason::PartnerLeft),
            "partner_disconnected" => Ok(EndReason::PartnerDisconnected),
            "reported" => Ok(EndReason::Reported),
            other => Err(format!("unknown end reason '{}'", other)),
        }
    }
}

/// A relayed chat message, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Compatibility criteria of a user asking for a partner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRequest {
    pub user_id: Uuid,
    pub gender: Gender,
    pub preferred_gender: PreferredGender,
    pub interests: Vec<String>,
}

/// Chat session entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub participant_genders: Vec<Gender>,
    pub preferred_gender: PreferredGender,
    pub interests: Vec<String>,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl ChatSession {
    /// Create a waiting session owned by the requester
    pub fn new_waiting(request: &MatchRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            participants: vec![request.user_id],
            participant_genders: vec![request.gender],
            preferred_gender: request.preferred_gender,
            interests: request.interests.clone(),
            status: SessionStatus::Waiting,
            messages: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The other participant, if `user_id` takes part and a peer exists
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        if !self.is_participant(user_id) {
            return None;
        }
        self.participants.iter().copied().find(|p| *p != user_id)
    }

    pub fn is_open(&self) -> bool {
        self.status != SessionStatus::Ended
    }

    /// Waiting -> Active with `user_id` as second participant
    pub fn attach(&mut self, user_id: Uuid, gender: Gender) -> ChatResult<()> {
        if self.is_participant(user_id) {
            return Err(ChatError::AlreadyInSession);
        }
        if self.status != SessionStatus::Waiting || self.participants.len() != 1 {
            return Err(ChatError::SessionNotActive);
        }

        self.participants.push(user_id);
        self.participant_genders.push(gender);
        self.status = SessionStatus::Active;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Append a message; only legal while Active
    pub fn append(&mut self, sender_id: Uuid, text: &str) -> ChatResult<Message> {
        if !self.is_participant(sender_id) {
            return Err(ChatError::NotAParticipant);
        }
        if self.status != SessionStatus::Active {
            return Err(ChatError::SessionNotActive);
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender_id,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Move to Ended. Returns false if the session had already ended.
    pub fn end(&mut self, reason: EndReason) -> bool {
        if self.status == SessionStatus::Ended {
            return false;
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(Utc::now());
        self.end_reason = Some(reason);
        true
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary::new(
            self.id,
            self.status,
            self.created_at,
            self.started_at,
            self.ended_at,
            self.end_reason,
            self.messages.len() as i64,
        )
    }
}

/// One entry of a user's chat history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub message_count: i64,
    /// Milliseconds between start (or creation) and end; null while open
    pub duration_ms: Option<i64>,
}

impl SessionSummary {
    pub fn new(
        id: Uuid,
        status: SessionStatus,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        end_reason: Option<EndReason>,
        message_count: i64,
    ) -> Self {
        let duration_ms = ended_at
            .map(|end| (end - started_at.unwrap_or(created_at)).num_milliseconds());
        Self {
            id,
            status,
            created_at,
            ended_at,
            end_reason,
            message_count,
            duration_ms,
        }
    }
}

/// A page of chat history, newest first
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub chats: Vec<SessionSummary>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

impl HistoryPage {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp user-supplied paging values
    pub fn normalize(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        (page, limit)
    }

    pub fn new(chats: Vec<SessionSummary>, total: i64, page: u32, limit: u32) -> Self {
        let total_pages = ((total.max(0) as u64).div_ceil(limit as u64)) as u32;
        Self {
            chats,
            total,
            page,
            total_pages,
        }
    }
}
