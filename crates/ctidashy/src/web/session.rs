//! Cookie sessions.
//!
//! A login stores a random token in an HTTP-only cookie and maps it to the
//! username here. The user record itself is re-read on every request, so a
//! panel change or removal takes effect immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::debug;

use super::AppState;
use crate::error::{Error, Result};
use crate::users::{DashboardUser, Panel, UserStore};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "ctidashy_session";

#[derive(Debug, Clone)]
struct Session {
    username: String,
    expires: Instant,
}

/// In-memory session table with sliding expiry.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create an empty table whose sessions idle out after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Start a session for `username` and return its token.
    pub async fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        sessions.retain(|_, session| session.expires > now);
        sessions.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                expires: now + self.ttl,
            },
        );
        token
    }

    /// Username of a live session, extending its expiry.
    pub async fn touch(&self, token: &str) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        match sessions.get_mut(token) {
            Some(session) if session.expires > now => {
                session.expires = now + self.ttl;
                Some(session.username.clone())
            }
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    /// End a session.
    pub async fn remove(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    /// End every session of `username`.
    pub async fn remove_user(&self, username: &str) {
        self.sessions
            .write()
            .await
            .retain(|_, session| session.username != username);
    }
}

/// Read the session token from the request cookies.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value that installs a session token.
///
/// # Errors
///
/// Returns an error if the token is not a valid header value.
pub fn session_cookie(token: &str, ttl: Duration) -> Result<(axum::http::HeaderName, HeaderValue)> {
    let value = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.as_secs()
    );
    HeaderValue::from_str(&value)
        .map(|v| (SET_COOKIE, v))
        .map_err(|e| Error::internal(format!("bad cookie value: {e}")))
}

/// `Set-Cookie` value that clears the session cookie.
#[must_use]
pub fn clear_cookie() -> (axum::http::HeaderName, HeaderValue) {
    (
        SET_COOKIE,
        HeaderValue::from_static("ctidashy_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    )
}

/// The logged-in user of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub DashboardUser);

impl CurrentUser {
    /// Fail unless the user holds `panel`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PanelDenied`] when the panel is not granted.
    pub fn require(&self, panel: Panel) -> Result<&DashboardUser> {
        if self.0.has_panel(panel) {
            Ok(&self.0)
        } else {
            debug!("{} denied {panel}", self.0.username);
            Err(Error::PanelDenied {
                panel: panel.to_string(),
            })
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = session_token(&parts.headers).ok_or(Error::LoginRequired)?;
        let username = state
            .sessions
            .touch(&token)
            .await
            .ok_or(Error::LoginRequired)?;

        let path = state.config().await.user_file_path();
        let user = tokio::task::spawn_blocking(move || UserStore::open(path)?.find(&username))
            .await
            .map_err(|e| Error::internal(e.to_string()))??;
        user.map(CurrentUser).ok_or(Error::LoginRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; ctidashy_session=abc123; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));

        let empty = HeaderMap::new();
        assert_eq!(session_token(&empty), None);
    }

    #[test]
    fn test_session_cookie_flags() {
        let (name, value) = session_cookie("tok", Duration::from_secs(60)).unwrap();
        assert_eq!(name, SET_COOKIE);
        let value = value.to_str().unwrap();
        assert!(value.starts_with("ctidashy_session=tok;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Max-Age=60"));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create("admin").await;
        assert_eq!(token.len(), 64);
        assert_eq!(store.touch(&token).await.as_deref(), Some("admin"));

        store.remove(&token).await;
        assert_eq!(store.touch(&token).await, None);
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.create("admin").await;
        assert_eq!(store.touch(&token).await, None);
    }

    #[tokio::test]
    async fn test_remove_user_ends_sessions() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create("analyst").await;
        let b = store.create("admin").await;
        store.remove_user("analyst").await;
        assert_eq!(store.touch(&a).await, None);
        assert!(store.touch(&b).await.is_some());
    }

    #[test]
    fn test_require_panel() {
        let user = CurrentUser(DashboardUser {
            username: "analyst".to_string(),
            password_hash: String::new(),
            panels: vec![Panel::ApiSearch],
        });
        assert!(user.require(Panel::ApiSearch).is_ok());
        assert!(matches!(
            user.require(Panel::Settings),
            Err(Error::PanelDenied { .. })
        ));
    }
}
