//! Utility functions for peercache

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::str::Utf8Error;

/// Percent-encoding set for path segments: everything except the unreserved
/// characters `A-Z a-z 0-9 - _ . ~`
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a group name or key for use as a URL path segment
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Decode a percent-encoded path segment
pub fn decode_key(encoded: &str) -> Result<String, Utf8Error> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|s| s.to_string())
}

/// Validate a group name (must be non-empty, no control characters)
pub fn validate_group_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidConfig(
            "group name cannot be empty".into(),
        ));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(crate::Error::InvalidConfig(format!(
            "group name {:?} contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Normalise a peer base URL (`http://host:port`, no trailing slash)
pub fn normalize_peer_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
