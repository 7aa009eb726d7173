//! Access token expiry extraction
//!
//! Reads the `exp` claim from the payload segment of a three-part token.
//! The signature is not verified: the value only drives refresh timing on
//! this client, never an authorization decision.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Expiry of `token` in unix milliseconds, or `None` if it cannot be read.
///
/// Any malformed input (wrong segment count, bad base64url, non-JSON
/// payload, missing or non-numeric `exp`) yields `None`.
pub fn access_token_expiry_ms(token: &str) -> Option<u64> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?;

    if let Some(secs) = exp.as_u64() {
        return secs.checked_mul(1000);
    }
    let secs = exp.as_f64()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0) as u64)
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
