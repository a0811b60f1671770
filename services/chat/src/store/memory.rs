//! In-process session store
//!
//! Each session sits behind its own mutex, so unrelated sessions never
//! contend and every status transition is validated under that lock.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::models::{ChatSession, EndReason, Gender, HistoryPage, MatchRequest, Message, Report};
use crate::store::SessionStore;

type Slot = Arc<Mutex<ChatSession>>;

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<Uuid, Slot>,
    /// user id -> their Waiting/Active session, maintained under the session lock
    open_by_user: DashMap<Uuid, Uuid>,
    reports: Mutex<Vec<Report>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session_id: Uuid) -> Option<Slot> {
        self.sessions.get(&session_id).map(|s| s.value().clone())
    }

    /// Reports filed so far, oldest first
    pub async fn reports(&self) -> Vec<Report> {
        self.reports.lock().await.clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_waiting(&self, request: &MatchRequest) -> ChatResult<ChatSession> {
        let session = ChatSession::new_waiting(request);
        self.sessions
            .insert(session.id, Arc::new(Mutex::new(session.clone())));
        self.open_by_user.insert(request.user_id, session.id);

        debug!(session_id = %session.id, "Stored waiting session");
        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> ChatResult<Option<ChatSession>> {
        match self.slot(session_id) {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn attach(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        gender: Gender,
    ) -> ChatResult<ChatSession> {
        let slot = self.slot(session_id).ok_or(ChatError::SessionNotFound)?;
        let mut session = slot.lock().await;

        session.attach(user_id, gender)?;
        self.open_by_user.insert(user_id, session_id);
        Ok(session.clone())
    }

    async fn append_message(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        text: &str,
    ) -> ChatResult<Message> {
        let slot = self.slot(session_id).ok_or(ChatError::SessionNotFound)?;
        let mut session = slot.lock().await;
        session.append(sender_id, text)
    }

    async fn end(&self, session_id: Uuid, reason: EndReason) -> ChatResult<Option<ChatSession>> {
        let slot = self.slot(session_id).ok_or(ChatError::SessionNotFound)?;
        let mut session = slot.lock().await;

        if !session.end(reason) {
            return Ok(None);
        }

        for participant in &session.participants {
            self.open_by_user
                .remove_if(participant, |_, open| *open == session_id);
        }
        Ok(Some(session.clone()))
    }

    async fn open_session_for(&self, user_id: Uuid) -> ChatResult<Option<ChatSession>> {
        let Some(session_id) = self.open_by_user.get(&user_id).map(|e| *e.value()) else {
            return Ok(None);
        };

        let session = self.get(session_id).await?;
        Ok(session.filter(|s| s.is_open() && s.is_participant(user_id)))
    }

    async fn history(&self, user_id: Uuid, page: u32, limit: u32) -> ChatResult<HistoryPage> {
        let slots: Vec<Slot> = self.sessions.iter().map(|e| e.value().clone()).collect();

        let mut summaries = Vec::new();
        for slot in slots {
            let session = slot.lock().await;
            if session.is_participant(user_id) {
                summaries.push(session.summary());
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = summaries.len() as i64;
        let offset = ((page.max(1) - 1) as usize).saturating_mul(limit as usize);
        let chats = summaries
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok(HistoryPage::new(chats, total, page, limit))
    }

    async fn record_report(&self, report: &Report) -> ChatResult<()> {
        self.reports.lock().await.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PreferredGender, ReportReason, SessionStatus};

    fn request() -> MatchRequest {
        MatchRequest {
            user_id: Uuid::new_v4(),
            gender: Gender::Female,
            preferred_gender: PreferredGender::Any,
            interests: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemorySessionStore::new();
        let req = request();

        let session = store.create_waiting(&req).await.unwrap();
        let loaded = store.get(session.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.status, SessionStatus::Waiting);
        assert_eq!(
            store.open_session_for(req.user_id).await.unwrap().map(|s| s.id),
            Some(session.id)
        );
    }

    #[tokio::test]
    async fn test_concurrent_attach_has_one_winner() {
        let store = Arc::new(MemorySessionStore::new());
        let session = store.create_waiting(&request()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.attach(session.id, Uuid::new_v4(), Gender::Male).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(ChatError::SessionNotActive) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        let session = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(session.participants.len(), 2);
    }

    #[tokio::test]
    async fn test_append_after_end_fails() {
        let store = MemorySessionStore::new();
        let req = request();
        let session = store.create_waiting(&req).await.unwrap();
        let joiner = Uuid::new_v4();
        store.attach(session.id, joiner, Gender::Male).await.unwrap();

        store.append_message(session.id, joiner, "hi").await.unwrap();
        store.end(session.id, EndReason::UserSkipped).await.unwrap();

        let err = store
            .append_message(session.id, req.user_id, "late")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::SessionNotActive));
        assert_eq!(store.get(session.id).await.unwrap().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_end_twice_returns_none() {
        let store = MemorySessionStore::new();
        let req = request();
        let session = store.create_waiting(&req).await.unwrap();

        assert!(store.end(session.id, EndReason::UserSkipped).await.unwrap().is_some());
        assert!(store.end(session.id, EndReason::UserSkipped).await.unwrap().is_none());
        assert!(store.open_session_for(req.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = MemorySessionStore::new();
        let err = store
            .end(Uuid::new_v4(), EndReason::UserSkipped)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_paged() {
        let store = MemorySessionStore::new();
        let req = request();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let session = store.create_waiting(&req).await.unwrap();
            store.end(session.id, EndReason::UserSkipped).await.unwrap();
            ids.push(session.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let page = store.history(req.user_id, 1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.chats.len(), 2);
        assert_eq!(page.chats[0].id, ids[2]);

        let page = store.history(req.user_id, 2, 2).await.unwrap();
        assert_eq!(page.chats.len(), 1);
        assert_eq!(page.chats[0].id, ids[0]);

        let other = store.history(Uuid::new_v4(), 1, 20).await.unwrap();
        assert_eq!(other.total, 0);
    }

    #[tokio::test]
    async fn test_reports_are_kept() {
        let store = MemorySessionStore::new();
        let report = Report::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            ReportReason::Spam,
            Some("ads".into()),
        );

        store.record_report(&report).await.unwrap();

        let reports = store.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, report.id);
    }
}
