//! The credential store
//!
//! One slot holding the access token, the refresh token and the access
//! token's expiry. The expiry is decoded from the token when it is stored
//! or loaded.
//! Reads report an expired access token as absent but keep the refresh
//! token available so the session can be recovered.
//!
//! Every mutation writes through to the `KeyValueStore`. Storage failures
//! are logged and never fail the in-memory update. Callers outside the
//! refresh coordinator should not mutate the store while a refresh is in
//! flight.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use common::Secret;
use tracing::{debug, warn};

use crate::claims::{access_token_expiry_ms, now_millis};
use crate::constants::{ACCESS_TOKEN_EXPIRY_KEY, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::storage::{KeyValueStore, MemoryStorage};

/// Snapshot of the stored session.
///
/// `access_token_expires_at_ms` is a unix timestamp in milliseconds, taken
/// from the token's `exp` claim when it was stored. `None` means unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// `None` when no access token is stored or it has expired
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub access_token_expires_at_ms: Option<u64>,
}

#[derive(Default)]
struct State {
    access: Option<Secret<String>>,
    refresh: Option<Secret<String>>,
    expires_at_ms: Option<u64>,
}

impl State {
    fn access_is_live(&self, now: u64) -> bool {
        self.access.is_some() && self.expires_at_ms.is_none_or(|expires| now < expires)
    }
}

/// Holder of the current session tokens.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStore>,
    state: RwLock<State>,
}

impl CredentialStore {
    /// Empty store backed by process memory.
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryStorage::new()))
    }

    /// Rehydrate from `storage`.
    ///
    /// Partial sessions are kept as found. The expiry always comes from the
    /// stored access token; the cached expiry key may belong to an earlier
    /// token if a write was interrupted, so it is only compared, never used.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let read = |key: &str| match storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "failed to read session key, treating as absent");
                None
            }
        };

        let access = read(ACCESS_TOKEN_KEY);
        let refresh = read(REFRESH_TOKEN_KEY);
        let expires_at_ms = access.as_deref().and_then(access_token_expiry_ms);
        let cached_expiry = read(ACCESS_TOKEN_EXPIRY_KEY).and_then(|c| c.parse::<u64>().ok());
        if access.is_some() && cached_expiry != expires_at_ms {
            debug!(
                cached = ?cached_expiry,
                derived = ?expires_at_ms,
                "cached expiry does not match access token, using token claim"
            );
        }

        debug!(
            has_access = access.is_some(),
            has_refresh = refresh.is_some(),
            "loaded session"
        );

        Self {
            storage,
            state: RwLock::new(State {
                access: access.map(Secret::new),
                refresh: refresh.map(Secret::new),
                expires_at_ms,
            }),
        }
    }

    /// Current credential, or `None` when nothing is stored.
    pub fn get(&self) -> Option<Credential> {
        let state = self.read();
        if state.access.is_none() && state.refresh.is_none() {
            return None;
        }
        let access_token = if state.access_is_live(now_millis()) {
            state.access.clone()
        } else {
            None
        };
        Some(Credential {
            access_token,
            refresh_token: state.refresh.clone(),
            access_token_expires_at_ms: state.expires_at_ms,
        })
    }

    /// The access token, unless absent or expired.
    pub fn access_token(&self) -> Option<String> {
        let state = self.read();
        if state.access_is_live(now_millis()) {
            state.access.as_ref().map(|t| t.expose().clone())
        } else {
            None
        }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh.as_ref().map(|t| t.expose().clone())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.read().refresh.is_some()
    }

    /// Store a new token pair. Never fails; an undecodable access token is
    /// stored with an unknown expiry.
    pub fn set(&self, access_token: &str, refresh_token: &str) {
        let mut state = self.write();
        Self::assign(&mut state, access_token, refresh_token);
        self.persist(&state);
    }

    /// Store a rotated pair only if the session still holds
    /// `expected_refresh`. Returns `false` (and changes nothing) if the
    /// session was cleared or replaced meanwhile.
    pub fn replace_if_refresh_matches(
        &self,
        expected_refresh: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> bool {
        let mut state = self.write();
        if state.refresh.as_ref().map(|t| t.as_str()) != Some(expected_refresh) {
            debug!("refresh token changed since refresh started, discarding result");
            return false;
        }
        Self::assign(&mut state, access_token, refresh_token);
        self.persist(&state);
        true
    }

    /// `true` when `now >= expiry - buffer`. Unknown expiry is never
    /// expiring.
    pub fn is_expiring_soon(&self, buffer: Duration) -> bool {
        match self.read().expires_at_ms {
            Some(expires) => {
                let buffer_ms = u64::try_from(buffer.as_millis()).unwrap_or(u64::MAX);
                now_millis() >= expires.saturating_sub(buffer_ms)
            }
            None => false,
        }
    }

    /// Erase both tokens and the expiry.
    pub fn clear(&self) {
        let mut state = self.write();
        *state = State::default();
        self.persist(&state);
        debug!("cleared session");
    }

    fn assign(state: &mut State, access_token: &str, refresh_token: &str) {
        state.expires_at_ms = access_token_expiry_ms(access_token);
        if state.expires_at_ms.is_none() {
            debug!("access token expiry unknown");
        }
        state.access = Some(Secret::from(access_token));
        state.refresh = Some(Secret::from(refresh_token));
    }

    /// Write `state` through to storage. Access token first, so an
    /// interrupted write never pairs a new refresh token with an old access
    /// token.
    fn persist(&self, state: &State) {
        let expiry = state.expires_at_ms.map(|e| e.to_string());
        let writes = [
            (ACCESS_TOKEN_KEY, state.access.as_ref().map(|t| t.as_str())),
            (ACCESS_TOKEN_EXPIRY_KEY, expiry.as_deref()),
            (REFRESH_TOKEN_KEY, state.refresh.as_ref().map(|t| t.as_str())),
        ];
        for (key, value) in writes {
            let result = match value {
                Some(value) => self.storage.set(key, value),
                None => self.storage.remove(key),
            };
            if let Err(e) = result {
                warn!(key, error = %e, "failed to persist session key");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
