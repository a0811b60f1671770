//! Read access to user accounts owned by the account service

use async_trait::async_trait;
use chrono::Utc;
use common::error::DatabaseError;
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::{Gender, PreferredGender, User, normalize_interests};

fn corrupt(detail: String) -> ChatError {
    ChatError::Storage(DatabaseError::CorruptRow {
        table: "users",
        detail,
    })
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> ChatResult<Option<User>>;

    /// Record online/offline status and last activity
    async fn touch(&self, user_id: Uuid, online: bool) -> ChatResult<()>;
}

/// In-memory directory, used in tests and with the memory storage backend
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<Uuid, User>,
    online: DashMap<Uuid, bool>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.get(&user_id).map(|o| *o).unwrap_or(false)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, user_id: Uuid) -> ChatResult<Option<User>> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn touch(&self, user_id: Uuid, online: bool) -> ChatResult<()> {
        self.online.insert(user_id, online);
        Ok(())
    }
}

/// Directory reading the shared `users` table
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, user_id: Uuid) -> ChatResult<Option<User>> {
        debug!(user_id = %user_id, "Looking up user");

        let row = sqlx::query(
            r#"
            SELECT id, gender, preferred_gender, interests, banned
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let gender: Gender = row
            .try_get::<String, _>("gender")?
            .parse()
            .map_err(corrupt)?;
        let preferred_gender: PreferredGender = row
            .try_get::<Option<String>, _>("preferred_gender")?
            .map(|p| p.parse::<PreferredGender>())
            .transpose()
            .map_err(corrupt)?
            .unwrap_or_default();
        let interests: Option<Vec<String>> = row.try_get("interests")?;

        Ok(Some(User {
            id: row.try_get("id")?,
            gender,
            preferred_gender,
            interests: normalize_interests(interests.unwrap_or_default()),
            banned: row.try_get::<Option<bool>, _>("banned")?.unwrap_or(false),
        }))
    }

    async fn touch(&self, user_id: Uuid, online: bool) -> ChatResult<()> {
        let status = if online { "online" } else { "offline" };

        sqlx::query("UPDATE users SET status = $2, last_active = $3 WHERE id = $1")
            .bind(user_id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
