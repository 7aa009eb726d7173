//! The authenticated request surface

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use session::CredentialStore;
use tracing::{debug, instrument, warn};
use transport::{RequestDescriptor, Response, TransportClient, TransportError};
use uuid::Uuid;

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, RefreshError, Result};
use crate::metrics;

/// Sends requests with the stored bearer token and recovers from 401s
/// through the shared `RefreshCoordinator`.
///
/// Cheap to clone; clones share the transport, the store and the
/// coordinator.
#[derive(Clone)]
pub struct AuthenticatedClient {
    transport: TransportClient,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    proactive_refresh: Option<Duration>,
}

impl AuthenticatedClient {
    pub fn new(transport: TransportClient, coordinator: RefreshCoordinator) -> Self {
        Self {
            transport,
            store: coordinator.store().clone(),
            coordinator,
            proactive_refresh: None,
        }
    }

    /// Refresh before sending when the access token expires within `buffer`.
    pub fn with_proactive_refresh(mut self, buffer: Duration) -> Self {
        self.proactive_refresh = Some(buffer);
        self
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn sign_in(&self, access_token: &str, refresh_token: &str) {
        self.coordinator.sign_in(access_token, refresh_token);
    }

    pub fn sign_out(&self) {
        self.coordinator.sign_out();
    }

    /// Send `descriptor`, refreshing and replaying once on 401.
    ///
    /// A second 401 after a successful refresh returns the first 401, so a
    /// server that keeps rejecting fresh tokens cannot cause a loop.
    pub async fn request(&self, descriptor: &RequestDescriptor) -> Result<Response> {
        let request_id = Uuid::new_v4().to_string();
        let result = self.request_with_id(descriptor, &request_id).await;

        let status = match &result {
            Ok(response) => response.status().as_str().to_string(),
            Err(e) => match e.status() {
                Some(status) => status.as_str().to_string(),
                None => error_label(e).to_string(),
            },
        };
        metrics::record_request(descriptor.method().as_str(), &status);
        result
    }

    /// `request` plus JSON decoding of the successful body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T> {
        let response = self.request(descriptor).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %descriptor.method(), path = descriptor.path()))]
    async fn request_with_id(
        &self,
        descriptor: &RequestDescriptor,
        request_id: &str,
    ) -> Result<Response> {
        if let Some(buffer) = self.proactive_refresh {
            self.refresh_ahead(buffer).await;
        }

        let token = self.store.access_token();
        let first = self
            .transport
            .send_with_id(descriptor, token.as_deref(), Some(request_id))
            .await;

        match first {
            Err(e) if e.is_unauthorized() => {
                self.recover(descriptor, request_id, token.as_deref(), e).await
            }
            other => other.map_err(Error::from),
        }
    }

    /// One refresh-and-replay after a 401.
    async fn recover(
        &self,
        descriptor: &RequestDescriptor,
        request_id: &str,
        sent_token: Option<&str>,
        unauthorized: TransportError,
    ) -> Result<Response> {
        // Another request may already have rotated the token since we sent
        let fresh = match self.current_token_if_changed(sent_token) {
            Some(current) => {
                debug!("access token changed while in flight, replaying with current token");
                current
            }
            None => {
                debug!("received 401, refreshing token");
                match self.coordinator.refresh().await {
                    Ok(token) => token,
                    Err(RefreshError::SessionReplaced) => {
                        match self.current_token_if_changed(sent_token) {
                            Some(current) => {
                                debug!("session replaced during refresh, replaying with new token");
                                current
                            }
                            None => return Err(RefreshError::SessionReplaced.into()),
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        match self
            .transport
            .send_with_id(descriptor, Some(&fresh), Some(request_id))
            .await
        {
            Ok(response) => Ok(response),
            Err(e) if e.is_unauthorized() => {
                warn!("replay after token refresh was also rejected");
                Err(Error::Transport(unauthorized))
            }
            Err(e) => Err(Error::Transport(e)),
        }
    }

    fn current_token_if_changed(&self, sent_token: Option<&str>) -> Option<String> {
        self.store
            .access_token()
            .filter(|current| Some(current.as_str()) != sent_token)
    }

    async fn refresh_ahead(&self, buffer: Duration) {
        if !self.store.has_refresh_token() || !self.store.is_expiring_soon(buffer) {
            return;
        }
        debug!(buffer_secs = buffer.as_secs(), "access token expiring soon, refreshing ahead");
        if let Err(e) = self.coordinator.refresh().await {
            warn!(error = %e, "proactive token refresh failed, sending with current session");
        }
    }
}

fn error_label(e: &Error) -> &'static str {
    match e {
        Error::Transport(TransportError::Network(_)) => "network_error",
        Error::Transport(_) => "invalid_request",
        Error::Refresh(_) => "refresh_error",
        Error::Decode(_) => "decode_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{DEFAULT_REFRESH_TIMEOUT, HttpRefresher};
    use transport::{RetryPolicy, TransportConfig};

    fn client_for(base_url: &str) -> AuthenticatedClient {
        let mut config = TransportConfig::new(base_url);
        config.retry = RetryPolicy::none();
        let transport = TransportClient::new(config).unwrap();
        let store = Arc::new(CredentialStore::in_memory());
        let refresher = Arc::new(HttpRefresher::new(transport.clone(), "auth/refresh-token"));
        let coordinator = RefreshCoordinator::new(store, refresher, DEFAULT_REFRESH_TIMEOUT);
        AuthenticatedClient::new(transport, coordinator)
    }

    #[test]
    fn store_is_shared_with_coordinator() {
        let client = client_for("http://127.0.0.1:9");
        client.sign_in("at", "rt");
        assert!(Arc::ptr_eq(client.store(), client.coordinator().store()));
        assert_eq!(client.store().refresh_token().as_deref(), Some("rt"));

        client.sign_out();
        assert!(client.store().get().is_none());
    }

    #[test]
    fn error_labels_cover_non_http_failures() {
        assert_eq!(error_label(&Error::Refresh(RefreshError::Unavailable)), "refresh_error");
        assert_eq!(error_label(&Error::Decode("eof".into())), "decode_error");
        assert_eq!(
            error_label(&Error::Transport(TransportError::InvalidRequest("bad".into()))),
            "invalid_request"
        );
    }

    #[test]
    fn proactive_refresh_is_off_by_default() {
        let client = client_for("http://127.0.0.1:9");
        assert!(client.proactive_refresh.is_none());
        let client = client.with_proactive_refresh(Duration::from_secs(60));
        assert_eq!(client.proactive_refresh, Some(Duration::from_secs(60)));
    }
}
