//! Background token refresh
//!
//! Periodically refreshes the session ahead of expiry so most requests
//! never see a 401. Goes through the same `RefreshCoordinator` as the
//! request path, so a background refresh and a request-time refresh never
//! both hit the endpoint.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordinator::RefreshCoordinator;

/// Spawn a task that refreshes whenever the access token expires within
/// `buffer`, checking every `interval`.
///
/// Stops on its own once the session has ended (refresh rejected or no
/// refresh token). A timed-out refresh is retried on the next tick.
pub fn spawn_refresh_task(
    coordinator: RefreshCoordinator,
    interval: Duration,
    buffer: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !refresh_cycle(&coordinator, buffer).await {
                info!("session ended, stopping background token refresh");
                return;
            }
        }
    })
}

/// One check. Returns `false` once there is no session left to keep alive.
async fn refresh_cycle(coordinator: &RefreshCoordinator, buffer: Duration) -> bool {
    let store = coordinator.store();
    if !store.has_refresh_token() {
        return false;
    }
    if !store.is_expiring_soon(buffer) {
        return true;
    }

    debug!(buffer_secs = buffer.as_secs(), "access token expiring soon, refreshing in background");
    match coordinator.refresh().await {
        Ok(_) => {
            info!("background token refresh succeeded");
            true
        }
        Err(e) if e.is_session_ended() => {
            warn!(error = %e, "background token refresh ended the session");
            false
        }
        Err(e) => {
            warn!(error = %e, "background token refresh failed, will retry next cycle");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use session::{CredentialStore, TokenPair, now_millis};

    use crate::coordinator::{DEFAULT_REFRESH_TIMEOUT, TokenRefresher};

    fn jwt_expiring_in(secs: u64) -> String {
        let exp = now_millis() / 1000 + secs;
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig")
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        reject: bool,
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = session::Result<TokenPair>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.reject {
                    return Err(session::Error::RefreshRejected("expired".into()));
                }
                Ok(TokenPair {
                    access_token: jwt_expiring_in(3600),
                    refresh_token: "rt_next".into(),
                    expires_in: Some(3600),
                    token_type: None,
                })
            })
        }
    }

    fn setup(access: &str, reject: bool) -> (RefreshCoordinator, Arc<CountingRefresher>) {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(access, "rt_first");
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            reject,
        });
        let coordinator = RefreshCoordinator::new(store, refresher.clone(), DEFAULT_REFRESH_TIMEOUT);
        (coordinator, refresher)
    }

    #[tokio::test]
    async fn cycle_skips_token_outside_buffer() {
        let (coordinator, refresher) = setup(&jwt_expiring_in(3600), false);

        assert!(refresh_cycle(&coordinator, Duration::from_secs(60)).await);

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.store().refresh_token().as_deref(), Some("rt_first"));
    }

    #[tokio::test]
    async fn cycle_refreshes_token_inside_buffer() {
        let (coordinator, refresher) = setup(&jwt_expiring_in(30), false);

        assert!(refresh_cycle(&coordinator, Duration::from_secs(60)).await);

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.store().refresh_token().as_deref(), Some("rt_next"));
        assert!(!coordinator.store().is_expiring_soon(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn cycle_leaves_opaque_token_alone() {
        let (coordinator, refresher) = setup("opaque-token", false);

        assert!(refresh_cycle(&coordinator, Duration::from_secs(60)).await);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_stops_the_task() {
        let (coordinator, refresher) = setup(&jwt_expiring_in(30), true);

        let handle = spawn_refresh_task(
            coordinator.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        handle.await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.store().get().is_none());
    }

    #[tokio::test]
    async fn task_exits_without_session() {
        let store = Arc::new(CredentialStore::in_memory());
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            reject: false,
        });
        let coordinator = RefreshCoordinator::new(store, refresher.clone(), DEFAULT_REFRESH_TIMEOUT);

        spawn_refresh_task(coordinator, Duration::from_millis(10), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }
}
