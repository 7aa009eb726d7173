//! Refresh endpoint contract
//!
//! `POST <base>/<refresh_path>` with `{"refreshToken": "..."}`. The backend
//! wraps every answer in `{"isSuccessful": bool, "responseContent": ...}`;
//! only a successful envelope with content counts as a refresh. The call
//! carries no bearer token and, being a POST, is never retried by the
//! transport.

use std::fmt;

use serde::{Deserialize, Serialize};
use transport::{RequestDescriptor, TransportClient, TransportError};

use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response envelope used by the backend.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    is_successful: bool,
    #[serde(default)]
    response_content: Option<TokenPair>,
    #[serde(default)]
    message: Option<String>,
}

/// A rotated token pair from the refresh endpoint.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires, as reported by the server
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Exchange `refresh` for a new token pair.
///
/// 400/401/403 answers and unsuccessful envelopes map to `RefreshRejected`;
/// other statuses and network failures to `Http`; undecodable bodies to
/// `InvalidResponse`.
pub async fn refresh_token(
    transport: &TransportClient,
    path: &str,
    refresh: &str,
) -> Result<TokenPair> {
    let body = serde_json::to_value(RefreshRequest {
        refresh_token: refresh,
    })
    .map_err(|e| Error::InvalidResponse(format!("encoding refresh request: {e}")))?;
    let descriptor = RequestDescriptor::post(path).json(body);

    let response = match transport.send(&descriptor, None).await {
        Ok(response) => response,
        Err(TransportError::Status(http)) => {
            let status = http.status();
            let body = http
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(match status.as_u16() {
                400 | 401 | 403 => {
                    Error::RefreshRejected(format!("refresh endpoint returned {status}: {body}"))
                }
                _ => Error::Http(format!("refresh endpoint returned {status}: {body}")),
            });
        }
        Err(e) => return Err(Error::Http(format!("refresh request failed: {e}"))),
    };

    let envelope = response
        .json::<Envelope>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("decoding refresh response: {e}")))?;

    match envelope {
        Envelope {
            is_successful: true,
            response_content: Some(pair),
            ..
        } => Ok(pair),
        Envelope {
            is_successful: true,
            response_content: None,
            ..
        } => Err(Error::InvalidResponse(
            "successful refresh response without responseContent".into(),
        )),
        Envelope {
            is_successful: false,
            message,
            ..
        } => Err(Error::RefreshRejected(
            message.unwrap_or_else(|| "isSuccessful was false".into()),
        )),
    }
}
