//! Domain models and realtime wire payloads

pub mod events;
pub mod report;
pub mod session;
pub mod user;

pub use events::{ClientEvent, EndNotice, ServerEvent};
pub use report::{Report, ReportReason};
pub use session::{
    ChatSession, EndReason, HistoryPage, MatchRequest, Message, SessionStatus, SessionSummary,
};
pub use user::{Gender, PreferredGender, User, normalize_interests};
