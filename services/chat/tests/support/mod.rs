//! Shared fixtures for the gateway integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use chat::{
    ConnectionHandle, Gateway, Outbound,
    filter::WordListFilter,
    models::{ClientEvent, EndNotice, Gender, PreferredGender, ServerEvent, User},
    store::MemorySessionStore,
    users::MemoryUserDirectory,
};

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub store: Arc<MemorySessionStore>,
    pub users: Arc<MemoryUserDirectory>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let gateway = Arc::new(Gateway::new(
            store.clone(),
            users.clone(),
            Arc::new(WordListFilter::default()),
        ));
        Self {
            gateway,
            store,
            users,
        }
    }

    pub fn user(&self, gender: Gender, preferred: PreferredGender, interests: &[&str]) -> User {
        let user = User {
            id: Uuid::new_v4(),
            gender,
            preferred_gender: preferred,
            interests: interests.iter().map(|s| s.to_string()).collect(),
            banned: false,
        };
        self.users.insert(user.clone());
        user
    }

    /// A user with no constraints
    pub fn anyone(&self) -> User {
        self.user(Gender::Other, PreferredGender::Any, &[])
    }

    pub async fn connect(&self, user: &User) -> Client {
        let (handle, rx) = ConnectionHandle::channel();
        self.gateway.connect(user, handle.clone()).await;
        Client {
            user: user.clone(),
            handle,
            rx,
        }
    }

    pub async fn send(&self, client: &Client, event: ClientEvent) {
        self.gateway
            .handle_event(&client.user, &client.handle, event)
            .await;
    }

    /// Connect two unconstrained users and pair them
    pub async fn paired(&self) -> (Client, Client, Uuid) {
        let mut a = self.connect(&self.anyone()).await;
        let mut b = self.connect(&self.anyone()).await;

        self.send(&a, ClientEvent::FindChat { interests: None }).await;
        self.send(&b, ClientEvent::FindChat { interests: None }).await;

        let chat_id = match b.events().first() {
            Some(ServerEvent::ChatStarted { chat_id, .. }) => *chat_id,
            other => panic!("expected chat_started, got {:?}", other),
        };
        a.events();
        (a, b, chat_id)
    }
}

pub struct Client {
    pub user: User,
    pub handle: ConnectionHandle,
    pub rx: UnboundedReceiver<Outbound>,
}

impl Client {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    /// Everything queued so far
    pub fn frames(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Queued events, ignoring heartbeats and close frames
    pub fn events(&mut self) -> Vec<ServerEvent> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

pub fn ended(events: &[ServerEvent]) -> Vec<EndNotice> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::ChatEnded { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
