use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ApiError;
use crate::http::{ApiRequest, ApiResponse, HttpTransport, OutgoingRequest};
use crate::models::{TokenPair, TokenResponse};
use crate::token_store::TokenStore;

pub const REFRESH_PATH: &str = "auth/refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    /// A refresh exchange is in flight
    Refreshing,
    /// No tokens; stays this way until a login stores a new pair
    Unauthenticated,
}

#[derive(Debug)]
enum RefreshFailure {
    /// The refresh endpoint refused, errored or was unreachable
    Rejected,
    /// Another caller's refresh failed (or the user logged out) while we waited
    SessionEnded,
}

/// Sends every authenticated request and owns the session's refresh protocol.
///
/// A request answered with 401 while a refresh token is held triggers one refresh
/// exchange and one retry of the original request. Concurrent callers that hit 401
/// at the same time share a single exchange: the refresh lock is the "refresh in
/// progress" marker, and whoever gets it second sees the outcome of the first.
pub struct RequestDispatcher {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenStore>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("transport", &"<dyn HttpTransport>")
            .field("state", &self.session_state())
            .finish()
    }
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            transport,
            tokens,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn session_state(&self) -> SessionState {
        if self.refresh_lock.try_lock().is_err() {
            SessionState::Refreshing
        } else if self.tokens.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Store the pair returned by a login
    pub fn establish_session(&self, pair: &TokenPair) -> Result<(), ApiError> {
        self.tokens.set(pair)?;
        info!("Session established");
        Ok(())
    }

    pub fn end_session(&self) -> Result<(), ApiError> {
        self.tokens.clear()?;
        info!("Session ended");
        Ok(())
    }

    /// Send a request without credentials and without the refresh retry
    pub async fn send_public(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self
            .transport
            .execute(OutgoingRequest::new(request, None))
            .await?;
        Ok(response)
    }

    /// Send an authenticated request.
    ///
    /// At most two physical requests are issued (original plus one retry) and at most
    /// one refresh exchange. When refresh fails the session is cleared and the original
    /// 401 is returned unchanged. Transport failures are returned as
    /// [`ApiError::Network`] and never retried.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let session = self.tokens.get()?;
        let response = self
            .issue(request, session.as_ref().map(|pair| pair.access.as_str()))
            .await?;

        if response.status != 401 {
            return Ok(response);
        }

        let Some(stale) = session.filter(TokenPair::has_refresh) else {
            debug!("401 on {} with no refresh token, not retrying", request.path);
            return Ok(response);
        };

        info!("🔑 401 on {} {}, refreshing session", request.method, request.path);
        match self.refresh_after_expiry(&stale).await {
            Ok(fresh) => {
                debug!("Retrying {} {} with refreshed token", request.method, request.path);
                self.issue(request, Some(&fresh.access)).await
            }
            Err(failure) => {
                warn!("Session refresh failed ({:?}), returning original 401", failure);
                Ok(response)
            }
        }
    }

    /// [`send`](Self::send), abandoned as soon as `cancel` fires
    pub async fn send_with_cancel(
        &self,
        request: &ApiRequest,
        cancel: &CancelToken,
    ) -> Result<ApiResponse, ApiError> {
        cancel.run(self.send(request)).await
    }

    async fn issue(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        debug!("📡 {} {}", request.method, request.path);
        let response = self
            .transport
            .execute(OutgoingRequest::new(request, bearer))
            .await
            .map_err(|e| {
                warn!("✗ {} {} failed: {}", request.method, request.path, e);
                e
            })?;
        Ok(response)
    }

    /// Obtain a usable pair after `stale.access` was rejected, sharing the exchange
    /// with any concurrent caller in the same situation.
    async fn refresh_after_expiry(&self, stale: &TokenPair) -> Result<TokenPair, RefreshFailure> {
        let _marker = self.refresh_lock.lock().await;

        let current = match self.tokens.get() {
            Ok(current) => current,
            Err(e) => {
                warn!("Token store unreadable during refresh: {}", e);
                return Err(self.abandon_session(RefreshFailure::Rejected));
            }
        };

        match current {
            None => Err(RefreshFailure::SessionEnded),
            Some(current) if current.access != stale.access => {
                debug!("Session already refreshed by a concurrent request");
                Ok(current)
            }
            Some(current) if !current.has_refresh() => {
                Err(self.abandon_session(RefreshFailure::Rejected))
            }
            Some(current) => self.exchange(&current.refresh).await,
        }
    }

    /// POST the refresh token and store the new pair; any failure clears the session
    async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, RefreshFailure> {
        let request = ApiRequest::post(REFRESH_PATH)
            .with_json(&serde_json::json!({ "refresh_token": refresh_token }))
            .map_err(|_| self.abandon_session(RefreshFailure::Rejected))?;

        let response = match self
            .transport
            .execute(OutgoingRequest::new(&request, None))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("✗ Refresh exchange failed: {}", e);
                return Err(self.abandon_session(RefreshFailure::Rejected));
            }
        };

        if !response.is_success() {
            warn!("✗ Refresh rejected with status {}", response.status);
            return Err(self.abandon_session(RefreshFailure::Rejected));
        }

        let pair: TokenPair = match response.json::<TokenResponse>() {
            Ok(body) => body.into(),
            Err(e) => {
                warn!("✗ Refresh response unreadable: {}", e);
                return Err(self.abandon_session(RefreshFailure::Rejected));
            }
        };

        if let Err(e) = self.tokens.set(&pair) {
            warn!("✗ Could not store refreshed tokens: {}", e);
            return Err(self.abandon_session(RefreshFailure::Rejected));
        }

        info!("✓ Session refreshed");
        Ok(pair)
    }

    fn abandon_session(&self, failure: RefreshFailure) -> RefreshFailure {
        if let Err(e) = self.tokens.clear() {
            warn!("Could not clear token store: {}", e);
        }
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockReply, MockTransport};
    use crate::token_store::MemoryTokenStore;

    fn dispatcher_with(
        transport: Arc<MockTransport>,
        pair: Option<TokenPair>,
    ) -> (RequestDispatcher, Arc<MemoryTokenStore>) {
        let tokens = Arc::new(match pair {
            Some(pair) => MemoryTokenStore::with_pair(pair),
            None => MemoryTokenStore::new(),
        });
        (RequestDispatcher::new(transport, tokens.clone()), tokens)
    }

    #[test]
    fn test_session_state_follows_store() {
        let (dispatcher, _tokens) = dispatcher_with(Arc::new(MockTransport::new()), None);
        assert_eq!(dispatcher.session_state(), SessionState::Unauthenticated);

        dispatcher
            .establish_session(&TokenPair::new("a1", "r1"))
            .unwrap();
        assert_eq!(dispatcher.session_state(), SessionState::Authenticated);

        dispatcher.end_session().unwrap();
        assert_eq!(dispatcher.session_state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_public_send_has_no_bearer() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue("auth/login", MockReply::status(401));
        let (dispatcher, tokens) =
            dispatcher_with(transport.clone(), Some(TokenPair::new("a1", "r1")));

        let response = dispatcher
            .send_public(&ApiRequest::post("auth/login"))
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(transport.requests()[0].authorization, None);
        assert_eq!(transport.count(REFRESH_PATH), 0);
        assert!(tokens.get().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_refresh_token_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue("auth/me", MockReply::status(401));
        let (dispatcher, _tokens) =
            dispatcher_with(transport.clone(), Some(TokenPair::new("a1", "")));

        let response = dispatcher.send(&ApiRequest::get("auth/me")).await.unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(transport.count("auth/me"), 1);
        assert_eq!(transport.count(REFRESH_PATH), 0);
    }
}
