//! The transport client
//!
//! Builds the outbound request from a `RequestDescriptor`, injects headers,
//! and runs the idempotent retry loop. Token acquisition is the caller's
//! concern; `send` just attaches whatever token it is given.

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Response, Url};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::descriptor::{RequestBody, RequestDescriptor};
use crate::error::{HttpError, Result, TransportError};
use crate::retry::RetryPolicy;

/// Header used to carry the caller's locale unless configured otherwise.
pub const DEFAULT_LOCALE_HEADER: &str = "accept-language";

/// Per-attempt timeout unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Correlation header attached when the caller supplies a request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Static header added to every request (name + value pair from config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Absolute http(s) URL every descriptor path is joined onto.
    pub base_url: String,
    /// Locale sent when a descriptor carries no override.
    pub locale: Option<String>,
    pub locale_header: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub headers: Vec<HeaderInjection>,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            locale: None,
            locale_header: DEFAULT_LOCALE_HEADER.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            headers: Vec::new(),
        }
    }
}

/// HTTP client performing one logical call per `send`.
///
/// Cheap to clone; clones share the connection pool and the locale.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    locale: RwLock<Option<String>>,
    locale_header: HeaderName,
    timeout: Duration,
    retry: RetryPolicy,
    static_headers: HeaderMap,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Build on top of an existing reqwest client (shared pool, custom TLS).
    pub fn with_client(http: reqwest::Client, config: TransportConfig) -> Result<Self> {
        let url = Url::parse(&config.base_url).map_err(|e| {
            TransportError::InvalidRequest(format!("invalid base_url {}: {e}", config.base_url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(TransportError::InvalidRequest(format!(
                "base_url must use http or https, got: {}",
                config.base_url
            )));
        }

        let locale_header = HeaderName::from_str(&config.locale_header).map_err(|e| {
            TransportError::InvalidRequest(format!(
                "invalid locale header {}: {e}",
                config.locale_header
            ))
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                locale: RwLock::new(config.locale),
                locale_header,
                timeout: config.timeout,
                retry: config.retry,
                static_headers: static_headers(&config.headers),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Locale currently sent when a descriptor has no override.
    pub fn locale(&self) -> Option<String> {
        self.inner
            .locale
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the default locale for subsequent requests.
    pub fn set_locale(&self, locale: Option<String>) {
        *self
            .inner
            .locale
            .write()
            .unwrap_or_else(PoisonError::into_inner) = locale;
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Perform the request described by `descriptor`.
    pub async fn send(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<Response> {
        self.send_with_id(descriptor, token, None).await
    }

    /// Like `send`, also tagging every attempt with `x-request-id`.
    ///
    /// Idempotent requests answered with a whitelisted status are retried
    /// per the configured `RetryPolicy`. The final non-2xx response becomes
    /// `TransportError::Status` with its body unread.
    #[instrument(skip_all, fields(method = %descriptor.method(), path = descriptor.path()))]
    pub async fn send_with_id(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Response> {
        let url = self.url_for(descriptor);
        let headers = self.headers_for(descriptor, token, request_id)?;
        let method = descriptor.method().clone();
        let policy = &self.inner.retry;

        let mut retries = 0u32;
        loop {
            let mut request = self
                .inner
                .http
                .request(method.clone(), &url)
                .headers(headers.clone())
                .timeout(self.inner.timeout);
            if !descriptor.query_pairs().is_empty() {
                request = request.query(descriptor.query_pairs());
            }
            match descriptor.body() {
                Some(RequestBody::Json(value)) => request = request.json(value),
                Some(RequestBody::Raw { bytes, .. }) => request = request.body(bytes.clone()),
                None => {}
            }

            let response = request.send().await.map_err(|e| {
                if e.is_builder() {
                    TransportError::InvalidRequest(e.to_string())
                } else {
                    debug!(error = %e, "request failed without a response");
                    TransportError::Network(e)
                }
            })?;
            let status = response.status();
            debug!(status = status.as_u16(), retries, "response received");

            if status.is_success() {
                return Ok(response);
            }

            if policy.should_retry(&method, status, retries) {
                retries += 1;
                let delay = policy.delay_for(retries, response.headers());
                warn!(
                    status = status.as_u16(),
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient status, retrying idempotent request"
                );
                metrics::counter!(
                    "api_client_transport_retries_total",
                    "method" => method.to_string(),
                    "status" => status.as_str().to_string()
                )
                .increment(1);
                // Release the connection before sleeping
                drop(response);
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(TransportError::Status(Box::new(HttpError::new(
                method, response,
            ))));
        }
    }

    /// Join the descriptor path onto the base URL.
    fn url_for(&self, descriptor: &RequestDescriptor) -> String {
        let path = descriptor.path().trim_start_matches('/');
        if path.is_empty() {
            self.inner.base_url.clone()
        } else {
            format!("{}/{}", self.inner.base_url, path)
        }
    }

    /// Headers for one attempt: static config headers, content type, locale,
    /// request id, then the bearer token.
    fn headers_for(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<HeaderMap> {
        let mut headers = self.inner.static_headers.clone();

        match descriptor.body() {
            Some(RequestBody::Json(_)) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Some(RequestBody::Raw {
                content_type: Some(content_type),
                ..
            }) => {
                headers.insert(CONTENT_TYPE, header_value("content-type", content_type)?);
            }
            Some(RequestBody::Raw { .. }) | None => {}
        }

        let locale = match descriptor.language_override() {
            Some(language) => Some(language.to_string()),
            None => self.locale(),
        };
        if let Some(locale) = locale {
            headers.insert(
                self.inner.locale_header.clone(),
                header_value(self.inner.locale_header.as_str(), &locale)?,
            );
        }

        if let Some(id) = request_id {
            headers.insert(
                HeaderName::from_static(REQUEST_ID_HEADER),
                header_value(REQUEST_ID_HEADER, id)?,
            );
        }

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                TransportError::InvalidRequest("access token is not a valid header value".into())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid value for {name}: {e}")))
}

/// Convert configured header injections, skipping invalid entries and never
/// letting config override the bearer token.
fn static_headers(injections: &[HeaderInjection]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == AUTHORIZATION {
            warn!(header = %injection.name, "refusing to inject authorization header from config");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
    headers
}
