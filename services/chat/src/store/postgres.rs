//! PostgreSQL session store
//!
//! Status transitions are conditional UPDATEs so the database arbitrates
//! concurrent attach and end calls. Appends lock the session row for the
//! duration of the insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::database::apply_schema;
use common::error::DatabaseError;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::{
    ChatSession, EndReason, Gender, HistoryPage, MatchRequest, Message, Report, SessionStatus,
    SessionSummary,
};
use crate::store::SessionStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chat_sessions (
        id UUID PRIMARY KEY,
        participants UUID[] NOT NULL,
        participant_genders TEXT[] NOT NULL,
        preferred_gender TEXT NOT NULL,
        interests TEXT[] NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        ended_at TIMESTAMPTZ,
        end_reason TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS chat_sessions_participants_idx ON chat_sessions USING GIN (participants)",
    "CREATE INDEX IF NOT EXISTS chat_sessions_status_idx ON chat_sessions (status)",
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        session_id UUID NOT NULL REFERENCES chat_sessions (id) ON DELETE CASCADE,
        sender_id UUID NOT NULL,
        body TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS chat_messages_session_idx ON chat_messages (session_id, seq)",
    r#"
    CREATE TABLE IF NOT EXISTS chat_reports (
        id UUID PRIMARY KEY,
        reported_by UUID NOT NULL,
        reported_user_id UUID NOT NULL,
        chat_id UUID,
        reason TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

const SESSION_COLUMNS: &str = "id, participants, participant_genders, preferred_gender, \
     interests, status, created_at, started_at, ended_at, end_reason";

fn corrupt(table: &'static str, detail: impl Into<String>) -> ChatError {
    ChatError::Storage(DatabaseError::CorruptRow {
        table,
        detail: detail.into(),
    })
}

fn parse_status(raw: &str) -> ChatResult<SessionStatus> {
    raw.parse().map_err(|e: String| corrupt("chat_sessions", e))
}

fn session_from_row(row: &PgRow, messages: Vec<Message>) -> ChatResult<ChatSession> {
    let participant_genders = row
        .try_get::<Vec<String>, _>("participant_genders")?
        .iter()
        .map(|g| g.parse::<Gender>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt("chat_sessions", e))?;

    let preferred_gender = row
        .try_get::<String, _>("preferred_gender")?
        .parse()
        .map_err(|e: String| corrupt("chat_sessions", e))?;

    let end_reason = row
        .try_get::<Option<String>, _>("end_reason")?
        .map(|r| r.parse::<EndReason>())
        .transpose()
        .map_err(|e| corrupt("chat_sessions", e))?;

    Ok(ChatSession {
        id: row.try_get("id")?,
        participants: row.try_get("participants")?,
        participant_genders,
        preferred_gender,
        interests: row.try_get("interests")?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        messages,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        end_reason,
    })
}

/// Session store backed by PostgreSQL
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the chat tables if they do not exist yet
    pub async fn ensure_schema(&self) -> ChatResult<()> {
        apply_schema(&self.pool, SCHEMA).await?;
        info!("Chat schema is up to date");
        Ok(())
    }

    async fn messages_of(&self, session_id: Uuid) -> ChatResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender_id, body, sent_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> ChatResult<Message> {
                Ok(Message {
                    id: row.try_get("id")?,
                    sender_id: row.try_get("sender_id")?,
                    text: row.try_get("body")?,
                    timestamp: row.try_get("sent_at")?,
                })
            })
            .collect()
    }

    /// Explain why a conditional attach touched no row
    async fn attach_failure(&self, session_id: Uuid, user_id: Uuid) -> ChatResult<ChatError> {
        let row = sqlx::query("SELECT participants FROM chat_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(ChatError::SessionNotFound);
        };
        let participants: Vec<Uuid> = row.try_get("participants")?;
        if participants.contains(&user_id) {
            Ok(ChatError::AlreadyInSession)
        } else {
            Ok(ChatError::SessionNotActive)
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_waiting(&self, request: &MatchRequest) -> ChatResult<ChatSession> {
        let session = ChatSession::new_waiting(request);
        let genders: Vec<String> = session
            .participant_genders
            .iter()
            .map(|g| g.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO chat_sessions
                (id, participants, participant_genders, preferred_gender, interests, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(&session.participants)
        .bind(&genders)
        .bind(session.preferred_gender.as_str())
        .bind(&session.interests)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        debug!(session_id = %session.id, "Stored waiting session");
        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> ChatResult<Option<ChatSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chat_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let messages = self.messages_of(session_id).await?;
                Ok(Some(session_from_row(&row, messages)?))
            }
            None => Ok(None),
        }
    }

    async fn attach(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        gender: Gender,
    ) -> ChatResult<ChatSession> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE chat_sessions
            SET participants = array_append(participants, $2),
                participant_genders = array_append(participant_genders, $3),
                status = 'active',
                started_at = $4
            WHERE id = $1
              AND status = 'waiting'
              AND cardinality(participants) = 1
              AND NOT ($2 = ANY(participants))
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(user_id)
        .bind(gender.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            // A waiting session never carries messages
            Some(row) => session_from_row(&row, Vec::new()),
            None => Err(self.attach_failure(session_id, user_id).await?),
        }
    }

    async fn append_message(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        text: &str,
    ) -> ChatResult<Message> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT status, participants FROM chat_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ChatError::SessionNotFound)?;

        let participants: Vec<Uuid> = row.try_get("participants")?;
        if !participants.contains(&sender_id) {
            return Err(ChatError::NotAParticipant);
        }
        if parse_status(&row.try_get::<String, _>("status")?)? != SessionStatus::Active {
            return Err(ChatError::SessionNotActive);
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender_id,
            text: text.to_string(),
            timestamp: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, sender_id, body, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id)
        .bind(session_id)
        .bind(sender_id)
        .bind(&message.text)
        .bind(message.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn end(&self, session_id: Uuid, reason: EndReason) -> ChatResult<Option<ChatSession>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE chat_sessions
            SET status = 'ended', ended_at = $2, end_reason = $3
            WHERE id = $1 AND status <> 'ended'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(Utc::now())
        .bind(reason.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let messages = self.messages_of(session_id).await?;
                Ok(Some(session_from_row(&row, messages)?))
            }
            None => {
                let exists = sqlx::query("SELECT 1 FROM chat_sessions WHERE id = $1")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
                if exists {
                    Ok(None)
                } else {
                    Err(ChatError::SessionNotFound)
                }
            }
        }
    }

    async fn open_session_for(&self, user_id: Uuid) -> ChatResult<Option<ChatSession>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM chat_sessions
            WHERE $1 = ANY(participants) AND status <> 'ended'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let session_id: Uuid = row.try_get("id")?;
                let messages = self.messages_of(session_id).await?;
                Ok(Some(session_from_row(&row, messages)?))
            }
            None => Ok(None),
        }
    }

    async fn history(&self, user_id: Uuid, page: u32, limit: u32) -> ChatResult<HistoryPage> {
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM chat_sessions WHERE $1 = ANY(participants)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?
                .try_get("total")?;

        let offset = (page.max(1) as i64 - 1) * limit as i64;
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.status, s.created_at, s.started_at, s.ended_at, s.end_reason,
                   (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.id) AS message_count
            FROM chat_sessions s
            WHERE $1 = ANY(s.participants)
            ORDER BY s.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let chats = rows
            .iter()
            .map(|row| -> ChatResult<SessionSummary> {
                let end_reason = row
                    .try_get::<Option<String>, _>("end_reason")?
                    .map(|r| r.parse::<EndReason>())
                    .transpose()
                    .map_err(|e| corrupt("chat_sessions", e))?;
                Ok(SessionSummary::new(
                    row.try_get("id")?,
                    parse_status(&row.try_get::<String, _>("status")?)?,
                    row.try_get::<DateTime<Utc>, _>("created_at")?,
                    row.try_get("started_at")?,
                    row.try_get("ended_at")?,
                    end_reason,
                    row.try_get("message_count")?,
                ))
            })
            .collect::<ChatResult<Vec<_>>>()?;

        Ok(HistoryPage::new(chats, total, page, limit))
    }

    async fn record_report(&self, report: &Report) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_reports
                (id, reported_by, reported_user_id, chat_id, reason, description, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(report.id)
        .bind(report.reported_by)
        .bind(report.reported_user_id)
        .bind(report.chat_id)
        .bind(report.reason.as_str())
        .bind(&report.description)
        .bind(&report.status)
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;

        info!(report_id = %report.id, reason = report.reason.as_str(), "Report recorded");
        Ok(())
    }
}
