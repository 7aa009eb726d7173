//! Session credentials for the storefront API client
//!
//! Holds the access/refresh token pair, derives the access token's expiry
//! from its `exp` claim, and persists both through a small key-value
//! boundary so a session survives restarts. Also speaks the backend's
//! refresh endpoint contract.
//!
//! Credential flow:
//! 1. Sign-in stores the pair via `CredentialStore::set()`
//! 2. Requests read `CredentialStore::access_token()` (expired tokens read as absent)
//! 3. On a 401 the refresh coordinator calls `token::refresh_token()`
//! 4. The rotated pair replaces the old one via `CredentialStore::replace_if_refresh_matches()`
//! 5. Sign-out or a rejected refresh calls `CredentialStore::clear()`

pub mod claims;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod storage;
pub mod token;

pub use claims::{access_token_expiry_ms, now_millis};
pub use constants::*;
pub use credentials::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage};
pub use token::{TokenPair, refresh_token};
