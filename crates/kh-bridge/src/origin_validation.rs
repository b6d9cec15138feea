//! WebSocket Origin header validation to prevent cross-site WebSocket hijacking.
//!
//! WebSocket connections are not subject to CORS restrictions - the browser
//! allows cross-origin WebSocket connections and only sends the Origin header
//! for the server to validate. Without Origin validation, any malicious webpage
//! can connect to WebSocket endpoints and potentially gain unauthorized access.
//!
//! This module provides validation functions that check the Origin header against
//! an allowlist of permitted origins. By default, only localhost variants are
//! allowed (`http://localhost:*`, `http://127.0.0.1:*`, `http://[::1]:*`).

use axum::http::{HeaderMap, StatusCode};

/// Default allowed origins for WebSocket connections (localhost variants only).
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "https://127.0.0.1",
    "http://[::1]",
    "https://[::1]",
];

/// Validates the Origin header of a WebSocket upgrade request against an allowlist.
///
/// # Arguments
///
/// * `headers` - The HTTP headers from the upgrade request
/// * `allowed_origins` - List of permitted origin patterns
///
/// # Returns
///
/// * `Ok(())` if the Origin header is present and matches an allowed origin
/// * `Err(StatusCode::FORBIDDEN)` if the Origin is missing, invalid, or not in the allowlist
///
/// # Security
///
/// This function performs the following checks:
/// 1. Verifies that the Origin header is present
/// 2. Validates that the Origin header value is valid UTF-8
/// 3. Checks if the Origin matches any allowed origin (exact match or prefix match with port)
///
/// # Examples
///
/// ```ignore
/// use axum::http::HeaderMap;
/// use kh_bridge::origin_validation::{validate_websocket_origin, DEFAULT_ALLOWED_ORIGINS};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("origin", "http://localhost:3000".parse().unwrap());
///
/// let allowed: Vec<String> = DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect();
/// assert!(validate_websocket_origin(&headers, &allowed).is_ok());
/// ```
pub fn validate_websocket_origin(
    headers: &HeaderMap,
    allowed_origins: &[String],
) -> Result<(), StatusCode> {
    // Extract the Origin header
    let origin = headers
        .get("origin")
        .ok_or(StatusCode::FORBIDDEN)?
        .to_str()
        .map_err(|_| StatusCode::FORBIDDEN)?;

    // Check if the origin matches any allowed origin
    let is_allowed = allowed_origins.iter().any(|allowed| {
        // Exact match
        if origin == allowed {
            return true;
        }

        // Prefix match with port (e.g., "http://localhost:3000" matches "http://localhost")
        if let Some(remainder) = origin.strip_prefix(allowed.as_str()) {
            // Check if the remainder is a port (starts with ':' followed by digits)
            if let Some(port) = remainder.strip_prefix(':') {
                return port.chars().all(|c| c.is_ascii_digit());
            }
        }

        false
    });

    if is_allowed {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// Helper function to get default allowed origins as a `Vec<String>`.
///
/// Returns a vector of default localhost origin patterns that are safe
/// to allow for local development and production use.
pub fn get_default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
