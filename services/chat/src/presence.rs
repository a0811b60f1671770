//! Presence registry: who is connected, over which connection, in which session
//!
//! At most one live connection per user. A second registration replaces the
//! first (last connection wins) and the caller decides what to do with the
//! replaced handle.

use dashmap::{DashMap, mapref::entry::Entry};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::ServerEvent;

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Heartbeat,
    Close { code: u16, reason: String },
}

/// Sender half of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// New handle plus the receiver its writer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event. Returns false if the connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn heartbeat(&self) -> bool {
        self.tx.send(Outbound::Heartbeat).is_ok()
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub connection: ConnectionHandle,
    pub current_session: Option<Uuid>,
    pub last_activity: Instant,
}

#[derive(Default)]
pub struct PresenceRegistry {
    entries: DashMap<Uuid, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `user_id`, returning the handle it replaced.
    ///
    /// The new entry keeps the replaced entry's current session.
    pub fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.id();
        let mut entry = PresenceEntry {
            connection: handle,
            current_session: None,
            last_activity: Instant::now(),
        };

        let replaced = match self.entries.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                entry.current_session = occupied.get().current_session;
                Some(occupied.insert(entry).connection)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                None
            }
        };

        debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            replaced = replaced.is_some(),
            "Presence registered"
        );
        replaced
    }

    pub fn unregister(&self, user_id: Uuid) -> Option<PresenceEntry> {
        self.entries.remove(&user_id).map(|(_, entry)| entry)
    }

    /// Remove the entry only if it still belongs to `connection_id`.
    ///
    /// A superseded connection closing must not evict its replacement.
    pub fn unregister_connection(&self, user_id: Uuid, connection_id: Uuid) -> Option<PresenceEntry> {
        self.entries
            .remove_if(&user_id, |_, entry| entry.connection.id() == connection_id)
            .map(|(_, entry)| entry)
    }

    /// Remove the entry only if it is still idle when the removal happens.
    ///
    /// A reconnect or an inbound event between an idle scan and the removal
    /// keeps the user registered.
    pub fn unregister_if_idle(&self, user_id: Uuid, timeout: Duration) -> Option<PresenceEntry> {
        self.entries
            .remove_if(&user_id, |_, entry| entry.last_activity.elapsed() > timeout)
            .map(|(_, entry)| entry)
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.entries.get(&user_id).map(|e| e.connection.clone())
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// No-op for users without an entry
    pub fn set_current_session(&self, user_id: Uuid, session_id: Option<Uuid>) {
        if let Some(mut entry) = self.entries.get_mut(&user_id) {
            entry.current_session = session_id;
        }
    }

    /// Clear the current session only if it is still `session_id`
    pub fn clear_session_if(&self, user_id: Uuid, session_id: Uuid) {
        if let Some(mut entry) = self.entries.get_mut(&user_id) {
            if entry.current_session == Some(session_id) {
                entry.current_session = None;
            }
        }
    }

    pub fn current_session(&self, user_id: Uuid) -> Option<Uuid> {
        self.entries.get(&user_id).and_then(|e| e.current_session)
    }

    pub fn touch(&self, user_id: Uuid) {
        if let Some(mut entry) = self.entries.get_mut(&user_id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Users whose last activity is older than `timeout`
    pub fn idle_users(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| now.duration_since(e.last_activity) > timeout)
            .map(|e| *e.key())
            .collect()
    }

    /// Queue an event for the user's live connection, if any
    pub fn send_to(&self, user_id: Uuid, event: ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(connection) => connection.send(event),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
