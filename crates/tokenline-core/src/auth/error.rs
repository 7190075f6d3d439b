use thiserror::Error;

use crate::api::ApiError;

/// Why a refresh-token exchange failed.
///
/// Cloneable so every caller waiting on a shared in-flight refresh sees the
/// same outcome. All variants are terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("could not persist refreshed token: {0}")]
    Storage(String),

    #[error("session ended while the refresh was in flight")]
    Superseded,
}

impl From<ApiError> for RefreshFailure {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => RefreshFailure::Rejected {
                status: 401,
                message: "refresh token rejected".to_string(),
            },
            ApiError::Rejected { status, message } => RefreshFailure::Rejected { status, message },
            ApiError::AccessDenied(body) => RefreshFailure::Rejected {
                status: 403,
                message: body,
            },
            ApiError::InvalidResponse(msg) => RefreshFailure::Malformed(msg),
            ApiError::Network(e) => RefreshFailure::Transport(e.to_string()),
            other => RefreshFailure::Transport(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Session ended: {0}")]
    RefreshFailed(#[from] RefreshFailure),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Request body cannot be replayed after refreshing the access token")]
    UnreplayableRequest,

    #[error("Credential storage failure: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Storage(format!("{:#}", err))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
