use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    domain::{ConversationId, PatientId},
    Result,
};

/// Where a conversation is in the menu → upload / chat flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    MenuSelection,
    UploadGetPatientId,
    UploadWaitFile { patient: PatientId },
    ChatGetPatientId,
    ChatMode { patient: PatientId },
}

impl SessionState {
    /// Stable upper-case name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Initial => "INITIAL",
            SessionState::MenuSelection => "MENU_SELECTION",
            SessionState::UploadGetPatientId => "UPLOAD_GET_PATIENT_ID",
            SessionState::UploadWaitFile { .. } => "UPLOAD_WAIT_FILE",
            SessionState::ChatGetPatientId => "CHAT_GET_PATIENT_ID",
            SessionState::ChatMode { .. } => "CHAT_MODE",
        }
    }

    pub fn patient_id(&self) -> Option<&PatientId> {
        match self {
            SessionState::UploadWaitFile { patient } | SessionState::ChatMode { patient } => {
                Some(patient)
            }
            _ => None,
        }
    }
}

/// Per-conversation record tracked across messages.
#[derive(Clone, Debug)]
pub struct Session {
    pub state: SessionState,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl Session {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: SessionState::Initial,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn patient_id(&self) -> Option<&PatientId> {
        self.state.patient_id()
    }

    pub fn touch(&mut self) {
        self.updated_at = Instant::now();
    }

    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        match ttl {
            Some(ttl) => now.saturating_duration_since(self.updated_at) > ttl,
            None => false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage for conversation sessions.
///
/// The in-memory implementation is the default; the trait exists so the
/// dispatcher can be exercised with fakes or backed by an external store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &ConversationId) -> Result<Option<Session>>;
    async fn put(&self, id: &ConversationId, session: Session) -> Result<()>;
    /// Returns true when a session was removed.
    async fn delete(&self, id: &ConversationId) -> Result<bool>;
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Process-local session map with optional idle expiry.
pub struct InMemorySessionStore {
    ttl: Option<Duration>,
    sessions: Mutex<HashMap<ConversationId, Session>>,
}

impl InMemorySessionStore {
    /// `ttl = None` keeps sessions for the lifetime of the process.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every session idle for longer than the TTL. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut map = self.sessions.lock().await;
        let before = map.len();
        map.retain(|_, s| !s.is_expired(self.ttl, now));
        before - map.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &ConversationId) -> Result<Option<Session>> {
        let mut map = self.sessions.lock().await;
        let expired = match map.get(id) {
            None => return Ok(None),
            Some(s) => s.is_expired(self.ttl, Instant::now()),
        };
        if expired {
            map.remove(id);
            tracing::debug!(conversation = %id, "session expired");
            return Ok(None);
        }
        Ok(map.get(id).cloned())
    }

    async fn put(&self, id: &ConversationId, session: Session) -> Result<()> {
        self.sessions.lock().await.insert(id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool> {
        Ok(self.sessions.lock().await.remove(id).is_some())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sessions.lock().await.len())
    }
}
