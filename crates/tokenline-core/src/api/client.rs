//! Client for the backend's authentication endpoints.
//!
//! This module provides the `ApiClient` struct for the four calls the
//! session pipeline depends on: login, register, profile and refresh.
//! Everything else goes through the authenticated request executor.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::UserProfile;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const ME_PATH: &str = "/auth/me";
pub const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Body of a successful `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Body of a successful `POST /auth/refresh`. Backends that rotate refresh
/// tokens send the replacement alongside the new access token.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Auth endpoint client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client rooted at `base_url` (e.g. `https://api.example.com`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build on an existing reqwest client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The underlying HTTP client
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a path against the base URL. Absolute URLs pass through unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Exchange email and password for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let url = self.url(LOGIN_PATH);
        debug!(url = %url, "Sending login request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&Credentials { email, password })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "login").await
    }

    /// Create an account. The response body is not used; callers log in afterwards.
    pub async fn register(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let url = self.url(REGISTER_PATH);
        debug!(url = %url, "Sending registration request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&Credentials { email, password })
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }

    /// Fetch the profile of the user owning `access_token`
    pub async fn me(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let response = self
            .client
            .get(self.url(ME_PATH))
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "profile").await
    }

    /// Present the refresh token as bearer credential and read the new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .bearer_auth(refresh_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "refresh").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(5)).expect("client builds")
    }

    #[test]
    fn test_url_resolution() {
        let api = client("https://api.example.com/");
        assert_eq!(api.base_url(), "https://api.example.com");
        assert_eq!(api.url("/auth/me"), "https://api.example.com/auth/me");
        assert_eq!(api.url("charts/today"), "https://api.example.com/charts/today");
        assert_eq!(api.url("https://cdn.example.com/x"), "https://cdn.example.com/x");
    }

    #[test]
    fn test_parse_login_response_without_user() {
        let json = r#"{"access_token": "a1", "refresh_token": "r1"}"#;
        let resp: LoginResponse = serde_json::from_str(json).expect("login JSON");
        assert_eq!(resp.access_token, "a1");
        assert!(resp.user.is_none());
    }

    #[tokio::test]
    async fn test_login_posts_credentials() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(serde_json::json!({
                "email": "ada@example.com",
                "password": "hunter2"
            })))
            .with_status(200)
            .with_body(r#"{"access_token":"a1","refresh_token":"r1","user":{"id":7,"email":"ada@example.com"}}"#)
            .create_async()
            .await;

        let resp = client(&server.url())
            .login("ada@example.com", "hunter2")
            .await
            .expect("login succeeds");

        assert_eq!(resp.refresh_token, "r1");
        assert_eq!(resp.user.map(|u| u.email).as_deref(), Some("ada@example.com"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected_surfaces_message() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/login")
            .with_status(400)
            .with_body(r#"{"message":"Invalid email or password"}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .login("ada@example.com", "wrong")
            .await
            .expect_err("login fails");

        match err {
            ApiError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid email or password");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_presents_refresh_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_header("Authorization", Matcher::Exact("Bearer r1".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"a2"}"#)
            .create_async()
            .await;

        let resp = client(&server.url()).refresh("r1").await.expect("refresh succeeds");
        assert_eq!(resp.access_token, "a2");
        assert!(resp.refresh_token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"token":"a2"}"#)
            .create_async()
            .await;

        let err = client(&server.url()).refresh("r1").await.expect_err("malformed");
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
