//! Cookie sessions kept in process memory.

use std::collections::HashMap;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::User;

pub const SESSION_COOKIE: &str = "tracker_session";

#[derive(Debug, Clone)]
struct Session {
    user: User,
    expires_at: DateTime<Utc>,
}

/// Maps session tokens to users. Cookie encoding is left to the cookie crate.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(ttl: Duration, secure: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            secure,
        }
    }

    /// Opens a session for `user` and returns its token.
    pub async fn create(&self, user: User) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::days(1));
        let session = Session {
            user,
            expires_at: Utc::now() + ttl,
        };

        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session);
        token
    }

    pub async fn get(&self, token: &str) -> Option<User> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user.clone())
    }

    pub async fn remove(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Resolves the session cookie carried in `jar`, if any.
    pub async fn user_from_jar(&self, jar: &CookieJar) -> Option<User> {
        let token = token_from_jar(jar)?;
        self.get(&token).await
    }

    pub fn cookie(&self, token: String) -> Cookie<'static> {
        let max_age = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(cookie::time::Duration::seconds(max_age))
            .build()
    }

    /// Cookie that matches the session cookie's path, for removal from a jar.
    pub fn removal_cookie() -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE).path("/").build()
    }
}

pub fn token_from_jar(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value_trimmed().to_string())
        .filter(|token| !token.is_empty())
}
