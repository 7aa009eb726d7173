//! Authenticated client for the storefront API
//!
//! Composes the transport, the credential store and a single-flight refresh
//! coordinator into one request surface. A request that comes back 401 is
//! refreshed and replayed at most once; any number of concurrently failing
//! requests share a single call to the refresh endpoint.
//!
//! Request lifecycle:
//! 1. Read the access token from `CredentialStore` (may be absent)
//! 2. Send through `TransportClient` (idempotent retry lives there)
//! 3. On 401 → `RefreshCoordinator::refresh()` starts or joins the shared refresh
//! 4. Success → replay the same descriptor once with the new token
//! 5. Refresh failure → `Error::Refresh`, the session is over
//! 6. Background task (optional) refreshes ahead of expiry through the same coordinator

pub mod client;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod refresh;

pub use client::AuthenticatedClient;
pub use coordinator::{DEFAULT_REFRESH_TIMEOUT, HttpRefresher, RefreshCoordinator, TokenRefresher};
pub use error::{Error, RefreshError, Result};
pub use refresh::spawn_refresh_task;
