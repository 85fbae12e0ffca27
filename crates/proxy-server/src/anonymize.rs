//! Client-identity header scrubbing.

use http::{HeaderMap, HeaderValue, header};

/// Value written into the identity headers that are overwritten rather than
/// removed.
pub const PLACEHOLDER: &str = "0.0.0.0";

/// Headers that reveal the client address and are dropped outright.
const IDENTIFYING_HEADERS: &[&str] = &[
    "forwarded",
    "x-real-ip",
    "x-client-ip",
    "client-ip",
    "true-client-ip",
    "cf-connecting-ip",
];

/// Client headers passed on to the upstream fetch. Everything else stays
/// behind so one client's state never ends up in a shared cache entry.
const FORWARDED_CLIENT_HEADERS: &[&str] = &["accept-language"];

/// Removes identifying headers and pins `x-forwarded-for` and `via` to
/// [`PLACEHOLDER`]. Applied on the way upstream and on the way back.
pub fn anonymize_headers(headers: &mut HeaderMap) {
    for name in IDENTIFYING_HEADERS {
        headers.remove(*name);
    }
    let placeholder = HeaderValue::from_static(PLACEHOLDER);
    headers.insert("x-forwarded-for", placeholder.clone());
    headers.insert(header::VIA, placeholder);
}

/// Builds the header set sent upstream for a client request.
pub fn upstream_headers(client: &HeaderMap) -> HeaderMap {
    let mut upstream = HeaderMap::new();
    for name in FORWARDED_CLIENT_HEADERS {
        if let Some(value) = client.get(*name) {
            upstream.insert(*name, value.clone());
        }
    }
    anonymize_headers(&mut upstream);
    upstream
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.7"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.7"));
        headers.insert("forwarded", HeaderValue::from_static("for=203.0.113.7"));
        headers.insert(header::VIA, HeaderValue::from_static("1.1 corp-gw"));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session=abc"));
        headers
    }

    #[test]
    fn identifying_headers_are_scrubbed() {
        let mut headers = client_headers();
        anonymize_headers(&mut headers);

        assert!(headers.get("x-real-ip").is_none());
        assert!(headers.get("cf-connecting-ip").is_none());
        assert!(headers.get("forwarded").is_none());
        assert_eq!(headers["x-forwarded-for"], PLACEHOLDER);
        assert_eq!(headers[header::VIA], PLACEHOLDER);
        assert_eq!(headers[header::ACCEPT_LANGUAGE], "de-DE");
    }

    #[test]
    fn placeholders_are_added_when_absent() {
        let mut headers = HeaderMap::new();
        anonymize_headers(&mut headers);
        assert_eq!(headers["x-forwarded-for"], PLACEHOLDER);
        assert_eq!(headers[header::VIA], PLACEHOLDER);
    }

    #[test]
    fn upstream_headers_keep_only_the_allowlist() {
        let upstream = upstream_headers(&client_headers());
        assert_eq!(upstream[header::ACCEPT_LANGUAGE], "de-DE");
        assert!(upstream.get(header::COOKIE).is_none());
        assert!(upstream.get("x-real-ip").is_none());
        assert_eq!(upstream["x-forwarded-for"], PLACEHOLDER);
        assert_eq!(upstream.len(), 3);
    }
}
