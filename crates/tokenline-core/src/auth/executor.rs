//! Bearer-authenticated request execution with one refresh-then-retry on 401.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response, StatusCode, Url};
use tracing::{debug, warn};

use super::error::{AuthError, AuthResult};
use super::lifecycle::SessionLifecycle;

/// Wraps outbound calls with the stored access token.
///
/// Any status other than 401 is returned untouched. A 401 drives exactly one
/// refresh through the session's coordinator and, on success, exactly one
/// retry of the original request. If the stored token changed while the
/// request was in flight, the retry uses it without another refresh.
/// Refresh failure ends the session.
pub struct AuthenticatedRequestExecutor {
    http: Client,
    lifecycle: SessionLifecycle,
    strict_unauthorized: bool,
}

impl AuthenticatedRequestExecutor {
    pub fn new(http: Client, lifecycle: SessionLifecycle) -> Self {
        Self {
            http,
            lifecycle,
            strict_unauthorized: false,
        }
    }

    /// When set, a 401 with no refresh token yields `AuthError::SessionExpired`
    /// instead of handing the 401 response back.
    pub fn strict_unauthorized(mut self, strict: bool) -> Self {
        self.strict_unauthorized = strict;
        self
    }

    pub async fn execute(&self, mut request: Request) -> AuthResult<Response> {
        let store = self.lifecycle.store();

        let sent_token = store.get_access()?;
        match sent_token.as_deref() {
            Some(token) => attach_bearer(&mut request, token)?,
            None => debug!(url = %request.url(), "No access token, sending unauthenticated"),
        }

        let replay = request.try_clone();
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(method = %method, url = %url, "Received 401, attempting token refresh");

        // Another caller may have rotated the token while this request was in flight
        let current = store.get_access()?;
        if let (Some(current), Some(sent)) = (current.as_deref(), sent_token.as_deref()) {
            if current != sent {
                debug!(method = %method, url = %url, "Access token already rotated, retrying");
                return self.retry(replay, current, &method, &url).await;
            }
        }

        if store.get_refresh()?.is_none() {
            self.lifecycle.end_session("unauthorized with no refresh token");
            if self.strict_unauthorized {
                return Err(AuthError::SessionExpired);
            }
            return Ok(response);
        }

        let token = match self.lifecycle.refresher().refresh().await {
            Ok(token) => token,
            Err(failure) => {
                self.lifecycle.end_session("token refresh failed");
                return Err(failure.into());
            }
        };

        self.retry(replay, &token, &method, &url).await
    }

    async fn retry(
        &self,
        replay: Option<Request>,
        token: &str,
        method: &Method,
        url: &Url,
    ) -> AuthResult<Response> {
        let Some(mut retry) = replay else {
            warn!(method = %method, url = %url, "Cannot replay streaming request body after refresh");
            return Err(AuthError::UnreplayableRequest);
        };

        attach_bearer(&mut retry, token)?;
        debug!(method = %method, url = %url, "Retrying with refreshed token");
        Ok(self.http.execute(retry).await?)
    }
}

fn attach_bearer(request: &mut Request, token: &str) -> AuthResult<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| AuthError::InvalidRequest("access token is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_bearer_replaces_existing_header() {
        let client = Client::new();
        let mut request = client
            .get("http://localhost/protected")
            .header(AUTHORIZATION, "Bearer stale")
            .build()
            .unwrap();

        attach_bearer(&mut request, "fresh").unwrap();
        let values: Vec<_> = request.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "Bearer fresh");
        assert!(values[0].is_sensitive());
    }

    #[test]
    fn test_attach_bearer_rejects_control_characters() {
        let client = Client::new();
        let mut request = client.get("http://localhost/").build().unwrap();
        let err = attach_bearer(&mut request, "bad\ntoken").unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }
}
