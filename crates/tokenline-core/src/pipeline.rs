//! `AuthClient`: the surface UI collaborators use.
//!
//! Bundles the session lifecycle with the authenticated executor and exposes
//! startup (`initialize_auth`), authenticated fetches, the login/register/
//! logout triggers and the observable session state.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::client::ME_PATH;
use crate::api::{ApiClient, ApiError};
use crate::auth::{AuthResult, AuthenticatedRequestExecutor, CredentialStore, SessionLifecycle};
use crate::config::Config;
use crate::models::{SessionState, UserProfile};

/// Clone is cheap; every clone shares one session.
#[derive(Clone)]
pub struct AuthClient {
    api: ApiClient,
    lifecycle: SessionLifecycle,
    executor: Arc<AuthenticatedRequestExecutor>,
}

impl AuthClient {
    /// Build from configuration, using the configured token backend.
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        let store = config.credential_store()?;
        Self::with_store(config, store)
    }

    /// Build from configuration with an explicit credential store.
    pub fn with_store(config: &Config, store: Arc<dyn CredentialStore>) -> AuthResult<Self> {
        let api = ApiClient::new(&config.base_url, config.request_timeout())?;
        Ok(Self::assemble(api, store, config.refresh_interval(), config.strict_unauthorized))
    }

    pub fn assemble(
        api: ApiClient,
        store: Arc<dyn CredentialStore>,
        refresh_interval: Duration,
        strict_unauthorized: bool,
    ) -> Self {
        let lifecycle = SessionLifecycle::new(api.clone(), store, refresh_interval);
        let executor = AuthenticatedRequestExecutor::new(api.http().clone(), lifecycle.clone())
            .strict_unauthorized(strict_unauthorized);
        Self {
            api,
            lifecycle,
            executor: Arc::new(executor),
        }
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restore a persisted session. Safe to call more than once.
    ///
    /// With a stored access token the profile is fetched through the
    /// executor, so an expired token gets one refresh-retry. Any failure
    /// leaves the session LoggedOut with the store cleared.
    pub async fn initialize_auth(&self) -> AuthResult<SessionState> {
        if self.lifecycle.is_authenticated() {
            return Ok(self.lifecycle.state());
        }

        if self.lifecycle.store().get_access()?.is_none() {
            debug!("No stored access token, starting logged out");
            return Ok(self.lifecycle.state());
        }

        match self.get_json::<UserProfile>(ME_PATH).await {
            Ok(user) => {
                info!(user_id = %user.id, "Session restored");
                self.lifecycle.establish(user);
            }
            Err(e) => {
                warn!(error = %e, "Could not restore session");
                self.lifecycle.end_session("startup profile fetch failed");
            }
        }
        Ok(self.lifecycle.state())
    }

    // =========================================================================
    // Authenticated requests
    // =========================================================================

    /// Start a request against the backend; `path` may be relative to the
    /// base URL or absolute.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.api.http().request(method, self.api.url(path))
    }

    /// Execute with bearer credentials and one refresh-retry on 401.
    pub async fn fetch_with_auth(&self, request: Request) -> AuthResult<Response> {
        self.executor.execute(request).await
    }

    /// Build and execute a request started with [`AuthClient::request`].
    pub async fn send(&self, builder: RequestBuilder) -> AuthResult<Response> {
        self.fetch_with_auth(builder.build()?).await
    }

    /// GET `path` and decode a JSON body; non-success statuses become `ApiError`s.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let response = ApiClient::check_response(response).await?;
        let text = response.text().await?;
        let value = serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })?;
        Ok(value)
    }

    // =========================================================================
    // Lifecycle triggers
    // =========================================================================

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        self.lifecycle.login(email, password).await
    }

    pub async fn register(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        self.lifecycle.register(email, password).await
    }

    pub fn logout(&self) -> AuthResult<()> {
        self.lifecycle.logout()
    }

    // =========================================================================
    // Observable state
    // =========================================================================

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.lifecycle.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lifecycle.is_authenticated()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.lifecycle.current_user()
    }
}
