//! Storage keys and endpoint defaults

/// Storage key for the current access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the current refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the cached access token expiry (unix milliseconds).
pub const ACCESS_TOKEN_EXPIRY_KEY: &str = "access_token_expires_at";

/// Refresh endpoint path, relative to the API base URL.
pub const DEFAULT_REFRESH_PATH: &str = "auth/refresh-token";
