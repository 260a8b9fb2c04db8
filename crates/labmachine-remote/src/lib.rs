//! Remote lab state.
//!
//! `HttpBackend` implements the store's `StateBackend` against any server
//! speaking the labmachine state protocol v1 (see `labmachine-server`):
//!
//! - `GET    <url>`: the state document, 404 when absent
//! - `PUT    <url>`: compare-and-swap, guarded by `X-Labmachine-Expected-Version`
//!   (`none` for an exclusive create); 409 with `{"current": n|null}` on mismatch
//! - `DELETE <url>`: remove the document, 404 when absent
//!
//! `GcsBackend` keeps the document as a Cloud Storage object (`gs://` locators).

pub mod config;
pub mod gcs;
pub mod http;

pub use config::RemoteConfig;
pub use gcs::{GcsBackend, GcsConfig};
pub use http::HttpBackend;

/// Protocol version sent as `X-Labmachine-Protocol` on every request.
pub const PROTOCOL_VERSION: u32 = 1;

pub const PROTOCOL_HEADER: &str = "X-Labmachine-Protocol";
pub const EXPECTED_VERSION_HEADER: &str = "X-Labmachine-Expected-Version";

/// Render an expected version for the `X-Labmachine-Expected-Version` header.
pub fn format_expected_version(expected: Option<u64>) -> String {
    expected.map_or_else(|| "none".to_owned(), |v| v.to_string())
}

/// Parse an `X-Labmachine-Expected-Version` header value.
pub fn parse_expected_version(value: &str) -> Option<Option<u64>> {
    match value.trim() {
        "none" => Some(None),
        other => other.parse().ok().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_header_values() {
        assert_eq!(format_expected_version(None), "none");
        assert_eq!(format_expected_version(Some(7)), "7");
        assert_eq!(parse_expected_version("none"), Some(None));
        assert_eq!(parse_expected_version(" 7 "), Some(Some(7)));
        assert_eq!(parse_expected_version("seven"), None);
    }
}
