//! Transport error types

use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

/// Errors from a single logical transport call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("{0}")]
    Status(Box<HttpError>),

    /// No response was obtained (DNS, connect, TLS, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request could not be built (bad URL, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// HTTP status, when the server responded at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Status(err) => Some(err.status()),
            _ => None,
        }
    }

    /// Whether this is a 401 from the server.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// A non-2xx response with its body left unread.
pub struct HttpError {
    method: Method,
    url: Url,
    response: Response,
}

impl HttpError {
    pub(crate) fn new(method: Method, response: Response) -> Self {
        Self {
            method,
            url: response.url().clone(),
            response,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// Read the body as text.
    pub async fn text(self) -> Result<String> {
        Ok(self.response.text().await?)
    }

    /// Read the body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        Ok(self.response.json::<T>().await?)
    }

    /// Hand back the raw response.
    pub fn into_response(self) -> Response {
        self.response
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("status", &self.status())
            .finish()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned {}", self.method, self.url, self.status())
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
