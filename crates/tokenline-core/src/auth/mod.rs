//! Authentication pipeline: credential storage, token refresh, request
//! execution and the session state machine.
//!
//! This module provides:
//! - `CredentialStore`: persistence of the access/refresh token pair
//!   (file, OS keychain or in-memory)
//! - `RefreshCoordinator`: single-flight refresh-token exchange
//! - `AuthenticatedRequestExecutor`: bearer header plus one refresh-retry on 401
//! - `SessionTimer`: proactive refresh on a fixed cadence (6 days by default)
//! - `SessionLifecycle`: login/register/logout and teardown on failure

pub mod credentials;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod refresh;
pub mod timer;

pub use credentials::{CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use error::{AuthError, AuthResult, RefreshFailure};
pub use executor::AuthenticatedRequestExecutor;
pub use lifecycle::SessionLifecycle;
pub use refresh::RefreshCoordinator;
pub use timer::{RefreshTimerHandle, SessionTimer, DEFAULT_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL};
