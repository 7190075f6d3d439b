//! LoggedOut/LoggedIn state machine.
//!
//! `SessionLifecycle` owns the credential store, the refresh coordinator and
//! the session timer, and publishes `SessionState` through a watch channel
//! that UI collaborators subscribe to.
//!
//! Transitions:
//! - LoggedOut -> LoggedIn: login, register-then-login, successful startup
//!   profile fetch. Tokens stored, profile published, timer started.
//! - LoggedIn -> LoggedOut: logout, any refresh failure, a 401 with no
//!   refresh token. Store cleared, timer stopped, state cleared.
//! - LoggedIn -> LoggedIn: a successful refresh only rotates tokens.
//!
//! Leaving a session invalidates the refresh coordinator first, so an
//! exchange still on the wire cannot repopulate a cleared store.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::models::{SessionState, UserProfile};

use super::credentials::CredentialStore;
use super::error::AuthResult;
use super::refresh::RefreshCoordinator;
use super::timer::SessionTimer;

struct LifecycleInner {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    timer: SessionTimer,
    state: watch::Sender<SessionState>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionLifecycle {
    inner: Arc<LifecycleInner>,
}

impl SessionLifecycle {
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>, refresh_interval: Duration) -> Self {
        let refresher = RefreshCoordinator::new(api.clone(), Arc::clone(&store));
        let (state, _) = watch::channel(SessionState::logged_out());
        Self {
            inner: Arc::new(LifecycleInner {
                api,
                store,
                refresher,
                timer: SessionTimer::new(refresh_interval),
                state,
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator> {
        &self.inner.refresher
    }

    pub fn timer(&self) -> &SessionTimer {
        &self.inner.timer
    }

    /// Receive every future state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().current_user.clone()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Log in with email and password. Replaces any existing session.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        let response = self.inner.api.login(email, password).await?;
        // Tokens from an earlier session must not land on top of these
        self.inner.refresher.invalidate();
        self.inner
            .store
            .put(Some(&response.access_token), Some(&response.refresh_token))?;

        let user = match response.user {
            Some(user) => user,
            None => match self.inner.api.me(&response.access_token).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(error = %e, "Profile fetch after login failed");
                    self.end_session("profile fetch after login failed");
                    return Err(e.into());
                }
            },
        };

        self.establish(user.clone());
        info!(user_id = %user.id, "Login successful");
        Ok(user)
    }

    /// Create an account, then log in with the same credentials.
    pub async fn register(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        self.inner.api.register(email, password).await?;
        info!("Registration successful, logging in");
        self.login(email, password).await
    }

    /// Explicit logout. Storage failures are returned after the in-memory
    /// state has already been cleared.
    pub fn logout(&self) -> AuthResult<()> {
        info!("Logging out");
        self.teardown()
    }

    /// Enter LoggedIn for `user`, whose tokens are already stored.
    pub(crate) fn establish(&self, user: UserProfile) {
        self.inner.state.send_replace(SessionState::logged_in(user));
        self.start_timer();
    }

    /// Tear the session down after an irrecoverable auth failure.
    /// Never fails; a storage error is logged.
    pub fn end_session(&self, reason: &str) {
        warn!(reason = reason, "Ending session");
        if let Err(e) = self.teardown() {
            error!(error = %e, "Failed to clear stored credentials");
        }
    }

    fn teardown(&self) -> AuthResult<()> {
        self.inner.refresher.invalidate();
        self.inner.timer.stop();
        self.inner.state.send_replace(SessionState::logged_out());
        self.inner.store.clear()?;
        Ok(())
    }

    fn start_timer(&self) {
        let weak: Weak<LifecycleInner> = Arc::downgrade(&self.inner);
        self.inner.timer.start(move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let lifecycle = SessionLifecycle { inner };
                match lifecycle.inner.refresher.refresh().await {
                    Ok(_) => ControlFlow::Continue(()),
                    Err(failure) => {
                        warn!(error = %failure, "Scheduled token refresh failed");
                        lifecycle.end_session("scheduled refresh failed");
                        ControlFlow::Break(())
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, RefreshFailure};
    use mockito::{Matcher, Server};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    const USER_JSON: &str = r#"{"id":7,"email":"ada@example.com"}"#;

    fn lifecycle(base: &str, store: Arc<dyn CredentialStore>, interval: Duration) -> SessionLifecycle {
        let api = ApiClient::new(base, Duration::from_secs(5)).expect("client builds");
        SessionLifecycle::new(api, store, interval)
    }

    fn profile() -> UserProfile {
        serde_json::from_str(USER_JSON).expect("profile JSON")
    }

    /// HTTP server that holds each request until the test supplies a 200 body.
    /// Connections are served one at a time.
    struct GatedServer {
        url: String,
        requests: mpsc::UnboundedReceiver<String>,
        replies: mpsc::UnboundedSender<String>,
    }

    impl GatedServer {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let (request_tx, requests) = mpsc::unbounded_channel();
            let (replies, mut reply_rx) = mpsc::unbounded_channel::<String>();

            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let head = read_head(&mut socket).await;
                    if request_tx.send(head).is_err() {
                        break;
                    }
                    let Some(body) = reply_rx.recv().await else {
                        break;
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self { url, requests, replies }
        }
    }

    async fn read_head(socket: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&head).into_owned()
    }

    #[tokio::test]
    async fn test_login_stores_tokens_and_starts_timer() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(format!(
                r#"{{"access_token":"a1","refresh_token":"r1","user":{}}}"#,
                USER_JSON
            ))
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let session = lifecycle(&server.url(), store.clone(), Duration::from_secs(3600));
        let mut updates = session.subscribe();

        let user = session.login("ada@example.com", "hunter2").await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(session.is_authenticated());
        assert!(session.timer().is_running());
        assert_eq!(store.get_access().unwrap().as_deref(), Some("a1"));
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("r1"));

        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().is_authenticated);
        session.logout().unwrap();
    }

    #[tokio::test]
    async fn test_login_without_user_falls_back_to_profile_endpoint() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"access_token":"a1","refresh_token":"r1"}"#)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/auth/me")
            .match_header("Authorization", Matcher::Exact("Bearer a1".into()))
            .with_status(200)
            .with_body(USER_JSON)
            .create_async()
            .await;

        let session = lifecycle(&server.url(), Arc::new(MemoryCredentialStore::new()), Duration::from_secs(3600));
        let user = session.login("ada@example.com", "hunter2").await.unwrap();
        assert_eq!(user, profile());
        me.assert_async().await;
        session.logout().unwrap();
    }

    #[tokio::test]
    async fn test_failed_login_stays_logged_out() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(401)
            .with_body(r#"{"message":"Invalid credentials"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let session = lifecycle(&server.url(), store.clone(), Duration::from_secs(3600));
        assert!(session.login("ada@example.com", "nope").await.is_err());
        assert!(!session.is_authenticated());
        assert!(!session.timer().is_running());
        assert!(store.get_access().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let mut server = Server::new_async().await;
        let register = server
            .mock("POST", "/auth/register")
            .with_status(200)
            .with_body(r#"{"message":"created"}"#)
            .create_async()
            .await;
        let login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(format!(
                r#"{{"access_token":"a1","refresh_token":"r1","user":{}}}"#,
                USER_JSON
            ))
            .create_async()
            .await;

        let session = lifecycle(&server.url(), Arc::new(MemoryCredentialStore::new()), Duration::from_secs(3600));
        session.register("ada@example.com", "hunter2").await.unwrap();
        assert!(session.is_authenticated());
        register.assert_async().await;
        login.assert_async().await;
        session.logout().unwrap();
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_and_timer() {
        let store = Arc::new(MemoryCredentialStore::with_tokens(Some("a1"), Some("r1")));
        let session = lifecycle("http://127.0.0.1:9", store.clone(), Duration::from_secs(3600));
        session.establish(profile());
        assert!(session.timer().active_handle().is_some());

        session.logout().unwrap();
        assert!(!session.is_authenticated());
        assert!(session.current_user().is_none());
        assert!(session.timer().active_handle().is_none());
        assert!(store.get_access().unwrap().is_none());
        assert!(store.get_refresh().unwrap().is_none());

        // Idempotent
        session.logout().unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_refresh_rotates_token_and_keeps_session() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .match_header("Authorization", Matcher::Exact("Bearer r1".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"a2"}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_tokens(Some("a1"), Some("r1")));
        let session = lifecycle(&server.url(), store.clone(), Duration::from_millis(50));
        session.establish(profile());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get_access().unwrap().as_deref(), Some("a2"));
        assert!(session.is_authenticated());
        assert!(session.timer().is_running());
        refresh.assert_async().await;
        session.logout().unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_refresh_failure_logs_out() {
        let mut server = Server::new_async().await;
        let _refresh = server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .with_body(r#"{"msg":"Token has been revoked"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_tokens(Some("a1"), Some("r1")));
        let session = lifecycle(&server.url(), store.clone(), Duration::from_millis(50));
        let mut updates = session.subscribe();
        session.establish(profile());

        // Wait for the logged-out transition
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                updates.changed().await.unwrap();
                if !updates.borrow_and_update().is_authenticated {
                    break;
                }
            }
        })
        .await
        .expect("session ends after failed refresh");

        assert!(store.get_access().unwrap().is_none());
        assert!(store.get_refresh().unwrap().is_none());
        assert!(!session.timer().is_running());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_leaves_store_empty() {
        let mut server = GatedServer::start().await;
        let store = Arc::new(MemoryCredentialStore::with_tokens(Some("a1"), Some("r1")));
        let session = lifecycle(&server.url, store.clone(), Duration::from_secs(3600));
        session.establish(profile());

        let refresher = Arc::clone(session.refresher());
        let pending = tokio::spawn(async move { refresher.refresh().await });
        let head = server.requests.recv().await.unwrap();
        assert!(head.contains("Bearer r1"));

        session.logout().unwrap();
        server
            .replies
            .send(r#"{"access_token":"a2","refresh_token":"r2"}"#.to_string())
            .unwrap();

        assert_eq!(pending.await.unwrap(), Err(RefreshFailure::Superseded));
        assert!(!session.is_authenticated());
        assert!(store.get_access().unwrap().is_none());
        assert!(store.get_refresh().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_session_does_not_join_stale_refresh() {
        let mut server = GatedServer::start().await;
        let store = Arc::new(MemoryCredentialStore::with_tokens(Some("a1"), Some("r1")));
        let session = lifecycle(&server.url, store.clone(), Duration::from_secs(3600));
        session.establish(profile());

        let refresher = Arc::clone(session.refresher());
        let stale = tokio::spawn({
            let refresher = Arc::clone(&refresher);
            async move { refresher.refresh().await }
        });
        assert!(server.requests.recv().await.unwrap().contains("Bearer r1"));
        session.logout().unwrap();

        // A new session stores its own pair before its first refresh
        store.put(Some("b1"), Some("s1")).unwrap();
        let fresh = tokio::spawn(async move { refresher.refresh().await });

        server.replies.send(r#"{"access_token":"a2"}"#.to_string()).unwrap();
        assert!(server.requests.recv().await.unwrap().contains("Bearer s1"));
        server.replies.send(r#"{"access_token":"b2"}"#.to_string()).unwrap();

        assert_eq!(stale.await.unwrap(), Err(RefreshFailure::Superseded));
        assert_eq!(fresh.await.unwrap(), Ok("b2".to_string()));
        assert_eq!(store.get_access().unwrap().as_deref(), Some("b2"));
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("s1"));
    }
}
