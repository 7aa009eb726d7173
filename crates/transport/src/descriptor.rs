//! Immutable description of one API call
//!
//! A descriptor is built once and borrowed by every attempt, so a replay
//! after a token refresh reissues exactly the same request.

use bytes::Bytes;
use reqwest::Method;

/// Request payload.
///
/// `Json` bodies get `content-type: application/json`; `Raw` bodies (file
/// uploads, pre-encoded forms) are sent byte-for-byte with whatever content
/// type the caller supplied, or none.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Raw {
        bytes: Bytes,
        content_type: Option<String>,
    },
}

/// Method, relative path, optional body, query pairs and locale override.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    body: Option<RequestBody>,
    query: Vec<(String, String)>,
    language: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            language: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    /// Attach a raw body that is forwarded unmodified.
    pub fn raw(mut self, bytes: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        self.body = Some(RequestBody::Raw {
            bytes: bytes.into(),
            content_type: content_type.map(str::to_owned),
        });
        self
    }

    /// Append a query parameter. Repeated keys are kept in order.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Override the configured locale for this call.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn language_override(&self) -> Option<&str> {
        self.language.as_deref()
    }
}
