//! REST client module for the backend's auth endpoints.
//!
//! This module provides the `ApiClient` for login, registration, profile
//! lookup and token refresh. The backend uses opaque bearer tokens:
//! a short-lived access token and a longer-lived refresh token.

pub mod client;
pub mod error;

pub use client::{ApiClient, LoginResponse, RefreshResponse};
pub use error::ApiError;
