//! HTTP Basic authentication on WebSocket upgrade.
//!
//! The principal of a transport session comes from the upgrade request,
//! never from STOMP frames. A request without credentials is anonymous; a
//! request with bad credentials is refused.

use std::collections::HashMap;

use arc_swap::ArcSwap;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::schema::UserConfig;
use crate::security::Principal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("malformed Authorization header")]
    Malformed,

    #[error("invalid credentials for '{0}'")]
    InvalidCredentials(String),
}

/// Static users, replaced wholesale on configuration reload.
pub struct UserStore {
    users: ArcSwap<HashMap<String, UserConfig>>,
}

impl UserStore {
    pub fn new(users: &[UserConfig]) -> Self {
        let store = Self::default();
        store.replace(users);
        store
    }

    pub fn replace(&self, users: &[UserConfig]) {
        let map = users
            .iter()
            .map(|u| (u.username.clone(), u.clone()))
            .collect();
        self.users.store(std::sync::Arc::new(map));
    }

    pub fn len(&self) -> usize {
        self.users.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn verify(&self, username: &str, password: &str) -> Option<Principal> {
        let users = self.users.load();
        let user = users.get(username)?;
        (user.password == password)
            .then(|| Principal::new(&user.username).with_roles(user.roles.iter().cloned()))
    }

    /// Principal for an upgrade request. `Ok(None)` means anonymous.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>, AuthError> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| AuthError::Malformed)?;
        let encoded = value
            .strip_prefix("Basic ")
            .ok_or(AuthError::Malformed)?
            .trim();
        let decoded = STANDARD.decode(encoded).map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;

        self.verify(username, password)
            .map(Some)
            .ok_or_else(|| AuthError::InvalidCredentials(username.to_string()))
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self {
            users: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}
