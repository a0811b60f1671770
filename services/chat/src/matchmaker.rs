//! Matchmaker: owns the waiting pool and pairs compatible users
//!
//! The pool is guarded by a single mutex held across the scan and the
//! store attach, so two requesters can never claim the same waiting
//! session. The store's Waiting -> Active compare-and-swap backs this up
//! for sessions that were ended behind the pool's back.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::{EndReason, Gender, MatchRequest, PreferredGender, SessionStatus};
use crate::presence::PresenceRegistry;
use crate::store::{SessionStore, open_session_with_retry};

/// Result of a match request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Requester joined an existing waiting session
    Attached { session_id: Uuid, peer_id: Uuid },
    /// Requester now owns a new waiting session
    Waiting { session_id: Uuid },
}

impl MatchOutcome {
    pub fn session_id(&self) -> Uuid {
        match self {
            MatchOutcome::Attached { session_id, .. } | MatchOutcome::Waiting { session_id } => {
                *session_id
            }
        }
    }
}

/// A waiting session as the pool sees it
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub session_id: Uuid,
    pub creator_id: Uuid,
    pub creator_gender: Gender,
    pub preferred_gender: PreferredGender,
    pub interests: Vec<String>,
    pub queued_at: Instant,
}

impl WaitingEntry {
    fn accepts(&self, request: &MatchRequest) -> bool {
        self.creator_id != request.user_id
            && request.preferred_gender.accepts(self.creator_gender)
            && self.preferred_gender.accepts(request.gender)
    }

    fn shares_interest(&self, interests: &[String]) -> bool {
        self.interests.iter().any(|i| interests.contains(i))
    }
}

/// Index of the entry `request` should attach to.
///
/// Mutually gender-compatible entries only; the first one sharing an
/// interest wins, otherwise the first compatible one. Scan order is
/// insertion order.
fn select_candidate(pool: &[WaitingEntry], request: &MatchRequest) -> Option<usize> {
    if !request.interests.is_empty() {
        let overlapping = pool
            .iter()
            .position(|e| e.accepts(request) && e.shares_interest(&request.interests));
        if overlapping.is_some() {
            return overlapping;
        }
    }

    pool.iter().position(|e| e.accepts(request))
}

pub struct Matchmaker {
    store: Arc<dyn SessionStore>,
    presence: Arc<PresenceRegistry>,
    pool: Mutex<Vec<WaitingEntry>>,
}

impl Matchmaker {
    pub fn new(store: Arc<dyn SessionStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            store,
            presence,
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Attach the requester to a compatible waiting session or queue a new one
    pub async fn request_match(&self, request: MatchRequest) -> ChatResult<MatchOutcome> {
        let mut pool = self.pool.lock().await;

        self.ensure_not_in_session(&pool, request.user_id).await?;

        while let Some(index) = select_candidate(&pool, &request) {
            let candidate = pool.remove(index);

            match self
                .store
                .attach(candidate.session_id, request.user_id, request.gender)
                .await
            {
                Ok(_) => {
                    self.presence
                        .set_current_session(request.user_id, Some(candidate.session_id));
                    self.presence
                        .set_current_session(candidate.creator_id, Some(candidate.session_id));

                    info!(
                        session_id = %candidate.session_id,
                        user_id = %request.user_id,
                        peer_id = %candidate.creator_id,
                        "Attached to waiting session"
                    );
                    return Ok(MatchOutcome::Attached {
                        session_id: candidate.session_id,
                        peer_id: candidate.creator_id,
                    });
                }
                Err(ChatError::SessionNotActive) | Err(ChatError::SessionNotFound) => {
                    debug!(
                        session_id = %candidate.session_id,
                        "Dropping stale pool entry, rescanning"
                    );
                }
                Err(err) => {
                    pool.insert(index, candidate);
                    return Err(err);
                }
            }
        }

        let session = self.store.create_waiting(&request).await?;
        pool.push(WaitingEntry {
            session_id: session.id,
            creator_id: request.user_id,
            creator_gender: request.gender,
            preferred_gender: request.preferred_gender,
            interests: request.interests.clone(),
            queued_at: Instant::now(),
        });
        self.presence
            .set_current_session(request.user_id, Some(session.id));

        info!(
            session_id = %session.id,
            user_id = %request.user_id,
            pool_size = pool.len(),
            "Waiting for partner"
        );
        Ok(MatchOutcome::Waiting {
            session_id: session.id,
        })
    }

    /// Reject users that already own a waiting or active session.
    ///
    /// A waiting session in the store that the pool no longer tracks can
    /// never be matched; it is ended so the user is not locked out.
    async fn ensure_not_in_session(&self, pool: &[WaitingEntry], user_id: Uuid) -> ChatResult<()> {
        if pool.iter().any(|e| e.creator_id == user_id) {
            return Err(ChatError::AlreadyInSession);
        }

        let Some(open) = open_session_with_retry(self.store.as_ref(), user_id).await? else {
            return Ok(());
        };

        if open.status == SessionStatus::Waiting {
            warn!(
                session_id = %open.id,
                user_id = %user_id,
                "Ending untracked waiting session"
            );
            self.store.end(open.id, EndReason::UserDisconnected).await?;
            self.presence.clear_session_if(user_id, open.id);
            return Ok(());
        }

        Err(ChatError::AlreadyInSession)
    }

    /// Drop a session from the pool. Returns true if it was queued.
    pub async fn cancel(&self, session_id: Uuid) -> bool {
        let mut pool = self.pool.lock().await;
        let before = pool.len();
        pool.retain(|e| e.session_id != session_id);
        before != pool.len()
    }

    pub async fn waiting_len(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Waiting entries whose creator is no longer connected
    pub async fn orphans(&self) -> Vec<WaitingEntry> {
        self.pool
            .lock()
            .await
            .iter()
            .filter(|e| !self.presence.is_online(e.creator_id))
            .cloned()
            .collect()
    }

    /// Waiting entries queued for longer than `timeout`
    pub async fn expired(&self, timeout: Duration) -> Vec<WaitingEntry> {
        let now = Instant::now();
        self.pool
            .lock()
            .await
            .iter()
            .filter(|e| now.duration_since(e.queued_at) > timeout)
            .cloned()
            .collect()
    }
}
