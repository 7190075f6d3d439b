//! Refresh-token exchange with single-flight deduplication.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::ApiClient;

use super::credentials::CredentialStore;
use super::error::RefreshFailure;

type PendingRefresh = Shared<BoxFuture<'static, Result<String, RefreshFailure>>>;

/// Exchanges the stored refresh token for a new access token.
///
/// At most one exchange runs at a time: concurrent callers await the same
/// pending future and all observe its result. A failure is final; the
/// decision to tear the session down belongs to the caller.
///
/// Every exchange belongs to a session generation. [`invalidate`] starts a
/// new generation, so an exchange that completes afterwards never writes to
/// the store and is never joined by a later caller.
///
/// [`invalidate`]: RefreshCoordinator::invalidate
pub struct RefreshCoordinator {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    // Held across the generation check and the store write
    generation: Mutex<u64>,
    in_flight: Mutex<Option<(u64, PendingRefresh)>>,
}

impl RefreshCoordinator {
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>) -> Arc<Self> {
        Arc::new(Self {
            api,
            store,
            generation: Mutex::new(0),
            in_flight: Mutex::new(None),
        })
    }

    /// Refresh the access token, joining an exchange already in flight.
    /// On success the new token is already persisted when this returns.
    pub async fn refresh(self: &Arc<Self>) -> Result<String, RefreshFailure> {
        let pending = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some((_, pending)) => {
                    debug!("Joining refresh already in flight");
                    pending.clone()
                }
                None => {
                    let generation = *self.generation();
                    let this = Arc::clone(self);
                    let pending = async move {
                        let result = this.exchange(generation).await;
                        let mut slot = this.slot();
                        if matches!(slot.as_ref(), Some((owner, _)) if *owner == generation) {
                            *slot = None;
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some((generation, pending.clone()));
                    pending
                }
            }
        };
        pending.await
    }

    /// End the current session generation. An exchange still running will
    /// fail with `RefreshFailure::Superseded` instead of storing tokens, and
    /// the next `refresh` starts a fresh exchange.
    pub fn invalidate(&self) {
        {
            let mut generation = self.generation();
            *generation += 1;
            debug!(generation = *generation, "Refresh generation advanced");
        }
        if self.slot().take().is_some() {
            debug!("Dropped refresh in flight from the previous session");
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<(u64, PendingRefresh)>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn exchange(&self, generation: u64) -> Result<String, RefreshFailure> {
        let refresh_token = self
            .store
            .get_refresh()
            .map_err(|e| RefreshFailure::Storage(format!("{:#}", e)))?
            .ok_or(RefreshFailure::MissingRefreshToken)?;

        let response = match self.api.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                let failure = RefreshFailure::from(e);
                warn!(error = %failure, "Token refresh failed");
                return Err(failure);
            }
        };

        let rotated = response.refresh_token.as_deref();
        {
            let current = self.generation();
            if *current != generation {
                warn!("Session ended during token refresh, discarding new tokens");
                return Err(RefreshFailure::Superseded);
            }
            self.store
                .put(Some(&response.access_token), rotated)
                .map_err(|e| RefreshFailure::Storage(format!("{:#}", e)))?;
        }

        info!(rotated_refresh_token = rotated.is_some(), "Access token refreshed");
        Ok(response.access_token)
    }
}
