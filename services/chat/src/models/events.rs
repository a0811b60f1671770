//! Realtime event payloads exchanged over the WebSocket
//!
//! Frames are JSON objects of the form `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::Message;

/// Inbound events sent by a client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    FindChat {
        #[serde(default)]
        interests: Option<Vec<String>>,
    },
    SendMessage {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        message: String,
    },
    TypingStart {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    TypingStop {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    SkipChat {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
    ReportUser {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        reason: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::FindChat { .. } => "find_chat",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
            ClientEvent::SkipChat { .. } => "skip_chat",
            ClientEvent::ReportUser { .. } => "report_user",
        }
    }
}

/// Reason shown to a participant whose chat just ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndNotice {
    PartnerLeft,
    PartnerDisconnected,
    UserSkipped,
    UserDisconnected,
    Reported,
    WaitTimeout,
}

impl EndNotice {
    pub fn message(&self) -> &'static str {
        match self {
            EndNotice::PartnerLeft => "Your chat partner has left the conversation.",
            EndNotice::PartnerDisconnected => "Your chat partner has disconnected.",
            EndNotice::UserSkipped => "You left the conversation.",
            EndNotice::UserDisconnected => "You have been disconnected due to inactivity.",
            EndNotice::Reported => "Your report was filed and the conversation has ended.",
            EndNotice::WaitTimeout => "No partner was found in time. Please try again.",
        }
    }
}

/// Body shared by `new_message` and `message_sent`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_own: bool,
}

/// Outbound events pushed to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    WaitingForPartner {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        message: String,
    },
    ChatStarted {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        message: String,
    },
    ChatFound {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    NewMessage(MessagePayload),
    MessageSent(MessagePayload),
    UserTyping {
        typing: bool,
    },
    ChatEnded {
        reason: EndNotice,
        message: String,
    },
    ReportSubmitted {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn waiting(chat_id: Uuid) -> Self {
        ServerEvent::WaitingForPartner {
            chat_id,
            message: "Looking for someone to chat with...".to_string(),
        }
    }

    pub fn started(chat_id: Uuid) -> Self {
        ServerEvent::ChatStarted {
            chat_id,
            message: "You are now connected with a stranger. Say hello!".to_string(),
        }
    }

    /// `message_sent` for the author, `new_message` for the peer
    pub fn message(message: &Message, own: bool) -> Self {
        let payload = MessagePayload {
            id: message.id,
            message: message.text.clone(),
            timestamp: message.timestamp,
            is_own: own,
        };
        if own {
            ServerEvent::MessageSent(payload)
        } else {
            ServerEvent::NewMessage(payload)
        }
    }

    pub fn ended(notice: EndNotice) -> Self {
        ServerEvent::ChatEnded {
            reason: notice,
            message: notice.message().to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_send_message() {
        let chat_id = Uuid::new_v4();
        let raw = json!({
            "event": "send_message",
            "data": { "chatId": chat_id, "message": "hello" }
        });

        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage {
                chat_id,
                message: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_decode_find_chat_without_interests() {
        let raw = json!({ "event": "find_chat", "data": {} });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event, ClientEvent::FindChat { interests: None });
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let raw = json!({ "event": "dance", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_encode_chat_ended() {
        let value = serde_json::to_value(ServerEvent::ended(EndNotice::PartnerLeft)).unwrap();
        assert_eq!(value["event"], "chat_ended");
        assert_eq!(value["data"]["reason"], "partner_left");
        assert_eq!(
            value["data"]["message"],
            "Your chat partner has left the conversation."
        );
    }

    #[test]
    fn test_encode_message_ownership() {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            text: "hi".to_string(),
            timestamp: Utc::now(),
        };

        let own = serde_json::to_value(ServerEvent::message(&message, true)).unwrap();
        assert_eq!(own["event"], "message_sent");
        assert_eq!(own["data"]["isOwn"], true);

        let theirs = serde_json::to_value(ServerEvent::message(&message, false)).unwrap();
        assert_eq!(theirs["event"], "new_message");
        assert_eq!(theirs["data"]["isOwn"], false);
        assert_eq!(theirs["data"]["message"], "hi");
    }
}
