//! Single-call HTTP transport for the storefront API
//!
//! `TransportClient` performs one logical request against a configured base
//! URL: it joins the path, injects the bearer token and locale headers, sets
//! the JSON content type for JSON bodies, and retries idempotent requests on
//! a fixed set of transient statuses. It knows nothing about how tokens are
//! obtained; that lives in the `api-client` crate.
//!
//! Any non-2xx response surfaces as `TransportError::Status` carrying the
//! un-read response, so callers decide whether the body is worth reading.

pub mod client;
pub mod descriptor;
pub mod error;
pub mod retry;

pub use client::{
    DEFAULT_LOCALE_HEADER, DEFAULT_TIMEOUT, HeaderInjection, REQUEST_ID_HEADER, TransportClient,
    TransportConfig,
};
pub use descriptor::{RequestBody, RequestDescriptor};
pub use error::{HttpError, Result, TransportError};
pub use retry::{RetryPolicy, is_idempotent, is_retryable_status};

pub use reqwest::{Method, Response, StatusCode};
