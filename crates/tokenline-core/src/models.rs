//! Data models shared by the endpoint client and the session lifecycle.
//!
//! - `UserProfile`: the server's snapshot of the signed-in user
//! - `SessionState`: what UI collaborators observe to switch rendering

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User identifiers arrive as numbers from some backends and strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

/// Immutable profile snapshot returned by `GET /auth/me` or the login response.
/// Fields beyond `id` and `email` are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Look up an additional profile field by name
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }

    /// Best display name: `name`, then `full_name`, then the email address
    pub fn display_name(&self) -> String {
        ["name", "full_name"]
            .iter()
            .filter_map(|key| self.extra.get(*key).and_then(|v| v.as_str()))
            .find(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.email.clone())
    }
}

/// Process-wide session state, published through a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub current_user: Option<UserProfile>,
    pub signed_in_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn logged_in(user: UserProfile) -> Self {
        Self {
            is_authenticated: true,
            current_user: Some(user),
            signed_in_at: Some(Utc::now()),
        }
    }

    pub fn logged_out() -> Self {
        Self::default()
    }
}
