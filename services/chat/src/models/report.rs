//! Abuse reports filed against a chat partner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ChatError;

/// Accepted report categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    InappropriateContent,
    Harassment,
    Spam,
    FakeProfile,
    Other,
}

impl ReportReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::InappropriateContent => "inappropriate_content",
            ReportReason::Harassment => "harassment",
            ReportReason::Spam => "spam",
            ReportReason::FakeProfile => "fake_profile",
            ReportReason::Other => "other",
        }
    }
}

impl FromStr for ReportReason {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inappropriate_content" => Ok(ReportReason::InappropriateContent),
            "harassment" => Ok(ReportReason::Harassment),
            "spam" => Ok(ReportReason::Spam),
            "fake_profile" => Ok(ReportReason::FakeProfile),
            "other" => Ok(ReportReason::Other),
            _ => Err(ChatError::InvalidInput("Invalid report reason".to_string())),
        }
    }
}

/// Report entity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    pub reported_by: Uuid,
    pub reported_user_id: Uuid,
    pub chat_id: Option<Uuid>,
    pub reason: ReportReason,
    pub description: String,
    /// Review state; new reports are always `pending`
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(
        reported_by: Uuid,
        reported_user_id: Uuid,
        chat_id: Option<Uuid>,
        reason: ReportReason,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reported_by,
            reported_user_id,
            chat_id,
            reason,
            description: description.unwrap_or_default(),
            status: "pending".to_string(),
            created_at: Utc::now(),
        }
    }
}
