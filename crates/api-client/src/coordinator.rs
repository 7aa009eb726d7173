//! Single-flight token refresh
//!
//! States: Idle (no refresh running) → Refreshing (one shared operation
//! in flight) → Idle once it settles. Callers arriving while Refreshing get
//! a clone of the same shared result, so at most one call to the refresh
//! endpoint is live at any time no matter how many requests fail with 401
//! together.
//!
//! The in-flight slot is a std `Mutex` held only to check/publish the
//! handle and to settle it (store write + slot clear). It is never held
//! across an await. The operation itself runs on a spawned task so it keeps
//! going even if every caller that joined it is dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use session::{CredentialStore, TokenPair};
use tracing::{debug, info, warn};
use transport::TransportClient;

use crate::error::RefreshError;
use crate::metrics;

/// Upper bound on one refresh call before every joiner is rejected.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Exchanges a refresh token for a new pair.
///
/// Uses `Pin<Box<dyn Future>>` so the coordinator can hold
/// `Arc<dyn TokenRefresher>`.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session::Result<TokenPair>> + Send + 'a>>;
}

/// Refresher calling the backend refresh endpoint over the transport.
pub struct HttpRefresher {
    transport: TransportClient,
    path: String,
}

impl HttpRefresher {
    pub fn new(transport: TransportClient, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session::Result<TokenPair>> + Send + 'a>> {
        Box::pin(session::refresh_token(
            &self.transport,
            &self.path,
            refresh_token,
        ))
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// The published handle of the refresh currently running.
struct InFlight {
    id: u64,
    result: SharedRefresh,
}

/// Ensures at most one token refresh runs at a time.
///
/// Cheap to clone; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                timeout,
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Obtain a fresh access token, starting a refresh or joining the one
    /// already running.
    ///
    /// Fails immediately with `Unavailable` (without touching the store) if
    /// no refresh token is stored. A backend rejection clears the store and
    /// is reported to every joiner as `Failed`. Never retried.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let pending = self.join_or_start()?;
        pending.await
    }

    /// Store a new session, serialized with any refresh settling.
    ///
    /// A refresh that is still in flight will find its refresh token
    /// replaced and resolve as `SessionReplaced`.
    pub fn sign_in(&self, access_token: &str, refresh_token: &str) {
        let _slot = self.inner.slot();
        self.inner.store.set(access_token, refresh_token);
        info!("signed in");
    }

    /// Clear the session, serialized with any refresh settling.
    pub fn sign_out(&self) {
        let _slot = self.inner.slot();
        self.inner.store.clear();
        info!("signed out");
    }

    /// Check-and-publish. Runs synchronously so no other task can observe
    /// the slot between the check and the publish.
    fn join_or_start(&self) -> Result<SharedRefresh, RefreshError> {
        let mut slot = self.inner.slot();

        if let Some(in_flight) = slot.as_ref() {
            debug!(refresh_id = in_flight.id, "joining in-flight token refresh");
            metrics::record_refresh_joined();
            return Ok(in_flight.result.clone());
        }

        let Some(refresh_token) = self.inner.store.refresh_token() else {
            warn!("token refresh needed but no refresh token is stored");
            metrics::record_refresh("unavailable");
            return Err(RefreshError::Unavailable);
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_refresh(self.inner.clone(), id, refresh_token));
        let weak = Arc::downgrade(&self.inner);
        let result = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task died before settling; free the slot ourselves
                    release_slot(&weak, id);
                    Err(RefreshError::Failed(format!("refresh task ended abnormally: {e}")))
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            result: result.clone(),
        });
        info!(refresh_id = id, "starting token refresh");
        Ok(result)
    }
}

/// The shared operation: call the endpoint under the timeout, then settle.
async fn run_refresh(inner: Arc<Inner>, id: u64, refresh_token: String) -> Result<String, RefreshError> {
    let outcome = tokio::time::timeout(inner.timeout, inner.refresher.refresh(&refresh_token)).await;
    settle(&inner, id, &refresh_token, outcome)
}

/// Apply the outcome to the store and clear the slot in one locked region.
fn settle(
    inner: &Inner,
    id: u64,
    refresh_token: &str,
    outcome: Result<session::Result<TokenPair>, tokio::time::error::Elapsed>,
) -> Result<String, RefreshError> {
    let mut slot = inner.slot();

    let result = match outcome {
        Ok(Ok(pair)) => {
            if inner.store.replace_if_refresh_matches(
                refresh_token,
                &pair.access_token,
                &pair.refresh_token,
            ) {
                info!(refresh_id = id, expires_in = ?pair.expires_in, "token refresh succeeded");
                metrics::record_refresh("success");
                Ok(pair.access_token)
            } else {
                warn!(refresh_id = id, "session changed during token refresh, discarding result");
                metrics::record_refresh("superseded");
                Err(changed_session(inner))
            }
        }
        Ok(Err(e)) => {
            if inner.store.refresh_token().as_deref() == Some(refresh_token) {
                warn!(refresh_id = id, error = %e, "token refresh failed, clearing session");
                inner.store.clear();
                metrics::record_refresh("failure");
                Err(RefreshError::Failed(e.to_string()))
            } else {
                warn!(refresh_id = id, error = %e, "token refresh failed after session changed");
                metrics::record_refresh("superseded");
                Err(changed_session(inner))
            }
        }
        Err(_) => {
            warn!(
                refresh_id = id,
                timeout_secs = inner.timeout.as_secs_f64(),
                "token refresh timed out, keeping session"
            );
            metrics::record_refresh("timeout");
            Err(RefreshError::TimedOut(inner.timeout))
        }
    };

    if slot.as_ref().is_some_and(|f| f.id == id) {
        *slot = None;
    }
    result
}

/// Outcome for a refresh whose session changed while it ran.
fn changed_session(inner: &Inner) -> RefreshError {
    if inner.store.has_refresh_token() {
        RefreshError::SessionReplaced
    } else {
        RefreshError::SignedOut
    }
}

fn release_slot(inner: &Weak<Inner>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        let mut slot = inner.slot();
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    #[derive(Clone, Copy)]
    enum Mode {
        Succeed,
        Reject,
        Hang,
    }

    /// Refresher that counts calls and waits for a permit before answering.
    struct FakeRefresher {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        gate: Semaphore,
        mode: Mode,
    }

    impl FakeRefresher {
        fn new(mode: Mode, open: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                mode,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl TokenRefresher for FakeRefresher {
        fn refresh<'a>(
            &'a self,
            refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = session::Result<TokenPair>> + Send + 'a>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                self.seen.lock().unwrap().push(refresh_token.to_string());
                let _permit = self.gate.acquire().await.unwrap();
                match self.mode {
                    Mode::Succeed => Ok(TokenPair {
                        access_token: format!("at_{}", n + 1),
                        refresh_token: format!("rt_{}", n + 1),
                        expires_in: Some(900),
                        token_type: Some("Bearer".into()),
                    }),
                    Mode::Reject => Err(session::Error::RefreshRejected("revoked".into())),
                    Mode::Hang => std::future::pending().await,
                }
            })
        }
    }

    fn signed_in_store() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::in_memory());
        store.set("at_1", "rt_1");
        store
    }

    fn coordinator(store: Arc<CredentialStore>, refresher: Arc<FakeRefresher>) -> RefreshCoordinator {
        RefreshCoordinator::new(store, refresher, DEFAULT_REFRESH_TIMEOUT)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Succeed, false);
        let coordinator = coordinator(store.clone(), refresher.clone());

        let callers: Vec<_> = (0..10).map(|_| coordinator.refresh()).collect();
        let release = async {
            tokio::task::yield_now().await;
            assert!(coordinator.is_refreshing());
            refresher.gate.add_permits(1);
        };
        let (results, ()) = tokio::join!(futures_util::future::join_all(callers), release);

        assert_eq!(refresher.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), "at_2");
        }
        assert_eq!(store.access_token().as_deref(), Some("at_2"));
        assert_eq!(store.refresh_token().as_deref(), Some("rt_2"));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn next_refresh_uses_rotated_token() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Succeed, true);
        let coordinator = coordinator(store.clone(), refresher.clone());

        assert_eq!(coordinator.refresh().await.unwrap(), "at_2");
        assert_eq!(coordinator.refresh().await.unwrap(), "at_3");

        assert_eq!(refresher.calls(), 2);
        assert_eq!(refresher.seen(), vec!["rt_1", "rt_2"]);
        assert_eq!(store.refresh_token().as_deref(), Some("rt_3"));
    }

    #[tokio::test]
    async fn missing_refresh_token_is_unavailable_and_publishes_nothing() {
        let store = Arc::new(CredentialStore::in_memory());
        let refresher = FakeRefresher::new(Mode::Succeed, true);
        let coordinator = coordinator(store.clone(), refresher.clone());

        let err = coordinator.refresh().await.unwrap_err();

        assert_eq!(err, RefreshError::Unavailable);
        assert_eq!(refresher.calls(), 0);
        assert!(!coordinator.is_refreshing());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn rejection_clears_session_for_every_joiner() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Reject, false);
        let coordinator = coordinator(store.clone(), refresher.clone());

        let callers: Vec<_> = (0..3).map(|_| coordinator.refresh()).collect();
        let release = async {
            tokio::task::yield_now().await;
            refresher.gate.add_permits(1);
        };
        let (results, ()) = tokio::join!(futures_util::future::join_all(callers), release);

        assert_eq!(refresher.calls(), 1);
        for result in results {
            let err = result.unwrap_err();
            assert!(matches!(err, RefreshError::Failed(ref m) if m.contains("revoked")), "got {err:?}");
        }
        assert!(store.get().is_none());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_refresh_times_out_and_keeps_session() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Hang, true);
        let coordinator =
            RefreshCoordinator::new(store.clone(), refresher.clone(), Duration::from_secs(5));

        let (first, second) = tokio::join!(coordinator.refresh(), coordinator.refresh());

        assert_eq!(first.unwrap_err(), RefreshError::TimedOut(Duration::from_secs(5)));
        assert_eq!(second.unwrap_err(), RefreshError::TimedOut(Duration::from_secs(5)));
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.refresh_token().as_deref(), Some("rt_1"));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn sign_out_during_refresh_reports_signed_out() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Succeed, false);
        let coordinator = coordinator(store.clone(), refresher.clone());

        let interrupt = async {
            tokio::task::yield_now().await;
            coordinator.sign_out();
            refresher.gate.add_permits(1);
        };
        let (result, ()) = tokio::join!(coordinator.refresh(), interrupt);

        let err = result.unwrap_err();
        assert_eq!(err, RefreshError::SignedOut);
        assert!(err.is_session_ended());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn sign_in_during_refresh_keeps_new_session() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Reject, false);
        let coordinator = coordinator(store.clone(), refresher.clone());

        let interrupt = async {
            tokio::task::yield_now().await;
            coordinator.sign_in("at_new", "rt_new");
            refresher.gate.add_permits(1);
        };
        let (result, ()) = tokio::join!(coordinator.refresh(), interrupt);

        let err = result.unwrap_err();
        assert_eq!(err, RefreshError::SessionReplaced);
        assert!(!err.is_session_ended());
        assert_eq!(store.access_token().as_deref(), Some("at_new"));
        assert_eq!(store.refresh_token().as_deref(), Some("rt_new"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_flight_holds_across_threads() {
        let store = signed_in_store();
        let refresher = FakeRefresher::new(Mode::Succeed, false);
        let coordinator = coordinator(store.clone(), refresher.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.refresh().await })
            })
            .collect();

        // Let every caller reach the coordinator before the refresh answers
        while refresher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.gate.add_permits(1);

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "at_2");
        }
        assert_eq!(refresher.calls(), 1);
    }
}
