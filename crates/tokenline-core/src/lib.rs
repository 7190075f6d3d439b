//! tokenline - authenticated request pipeline.
//!
//! Attaches bearer credentials to outbound API calls, recovers from expired
//! access tokens by exchanging the refresh token once, rotates tokens on a
//! background schedule, and falls back to a logged-out state when recovery
//! is impossible.
//!
//! Start with [`AuthClient`]:
//!
//! ```no_run
//! # async fn demo() -> Result<(), tokenline_core::AuthError> {
//! use tokenline_core::{AuthClient, Config, Method};
//!
//! let client = AuthClient::from_config(&Config::default())?;
//! client.initialize_auth().await?;
//! if !client.is_authenticated() {
//!     client.login("ada@example.com", "hunter2").await?;
//! }
//! let response = client.send(client.request(Method::GET, "/charts/today")).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod pipeline;

pub use api::{ApiClient, ApiError};
pub use auth::{
    AuthError, AuthResult, AuthenticatedRequestExecutor, CredentialStore, FileCredentialStore,
    KeyringCredentialStore, MemoryCredentialStore, RefreshCoordinator, RefreshFailure,
    RefreshTimerHandle, SessionLifecycle, SessionTimer,
};
pub use config::{Config, TokenBackend};
pub use models::{SessionState, UserId, UserProfile};
pub use pipeline::AuthClient;

// Re-exported so callers can build requests without a direct reqwest dependency
pub use reqwest::{Method, StatusCode};
