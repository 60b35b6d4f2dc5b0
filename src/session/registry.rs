//! Index of live transport sessions.
//!
//! # Responsibilities
//! - Exclusive id → session index
//! - Principal → session ids index (anonymous sessions under a sentinel)
//! - Outbound delivery to a session by id
//!
//! # Design Decisions
//! - One lock guards both indexes so they never disagree
//! - Sessions are cloned out before any await; no lock is held across I/O

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::transport::{CloseReason, Session, TransportError};
use crate::session::SessionId;
use crate::stomp::Frame;

/// Principal index key. `Anonymous` stands in for a missing principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrincipalKey {
    Anonymous,
    Named(String),
}

impl PrincipalKey {
    fn of(session: &dyn Session) -> Self {
        session
            .principal()
            .map(|p| PrincipalKey::Named(p.name().to_string()))
            .unwrap_or(PrincipalKey::Anonymous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} is already registered")]
    Duplicate(SessionId),

    #[error("session {0} is not registered")]
    NotFound(SessionId),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("session {0} is not registered")]
    NotFound(SessionId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<SessionId, Arc<dyn Session>>,
    by_principal: HashMap<PrincipalKey, HashSet<SessionId>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<dyn Session>) -> Result<(), RegistryError> {
        let id = session.id().clone();
        let key = PrincipalKey::of(session.as_ref());

        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        inner.by_principal.entry(key).or_default().insert(id.clone());
        inner.by_id.insert(id, session);
        Ok(())
    }

    pub fn unregister(&self, id: &SessionId) -> Result<Arc<dyn Session>, RegistryError> {
        let mut inner = self.inner.write();
        let session = inner
            .by_id
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        let key = PrincipalKey::of(session.as_ref());
        if let Some(ids) = inner.by_principal.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                inner.by_principal.remove(&key);
            }
        }
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<dyn Session>> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Sessions owned by a principal (`None` = anonymous).
    pub fn sessions_for(&self, principal: Option<&str>) -> Vec<Arc<dyn Session>> {
        let key = principal
            .map(|p| PrincipalKey::Named(p.to_string()))
            .unwrap_or(PrincipalKey::Anonymous);
        let inner = self.inner.read();
        inner
            .by_principal
            .get(&key)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.read().by_id.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn deliver_to_session(&self, id: &SessionId, frame: &Frame) -> Result<(), DeliveryError> {
        let session = self
            .get(id)
            .ok_or_else(|| DeliveryError::NotFound(id.clone()))?;
        session.send_frame(frame).await?;
        Ok(())
    }

    pub async fn close_session(&self, id: &SessionId, reason: CloseReason) -> Result<(), RegistryError> {
        let session = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        session.close(reason).await;
        Ok(())
    }

    /// Close every registered session (shutdown).
    pub async fn close_all(&self, reason: CloseReason) {
        let sessions: Vec<_> = self.inner.read().by_id.values().cloned().collect();
        for session in sessions {
            session.close(reason).await;
        }
    }
}
