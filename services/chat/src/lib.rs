//! Anonymous 1:1 chat: matchmaking engine and live session relay
//!
//! Users are paired by mutual gender preference, with shared interests as a
//! soft preference, then exchange messages through the relay until one side
//! skips, disconnects or reports the other.

pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod housekeeping;
pub mod matchmaker;
pub mod middleware;
pub mod models;
pub mod presence;
pub mod relay;
pub mod routes;
pub mod state;
pub mod store;
pub mod users;
pub mod ws;

pub use error::{ApiError, ChatError, ChatResult};
pub use gateway::Gateway;
pub use matchmaker::{MatchOutcome, Matchmaker};
pub use presence::{ConnectionHandle, Outbound, PresenceRegistry};
pub use relay::SessionRelay;
pub use state::AppState;
