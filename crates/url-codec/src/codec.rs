use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

/// Marker every client-facing proxy path starts with.
pub const PROXY_PREFIX: &str = "/proxy/";

/// Lower-cased, percent-encoded form of [`PROXY_PREFIX`].
const ENCODED_MARKER: &str = "%2fproxy%2f";

/// Schemes that never leave the page and must not be routed through the proxy.
const PASSTHROUGH_SCHEMES: &[&str] = &["javascript:", "data:", "mailto:", "tel:", "blob:", "about:"];

/// Schemes the proxy knows how to fetch or bridge.
const WEB_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid proxy path '{path}': {reason}")]
    InvalidProxyPath { path: String, reason: &'static str },
}

fn invalid(path: &str, reason: &'static str) -> CodecError {
    CodecError::InvalidProxyPath {
        path: path.to_string(),
        reason,
    }
}

/// Rewrites `raw` into its proxy path, resolving it against `base` first.
///
/// Empty values, fragment-only references and non-web schemes (`javascript:`,
/// `data:`, `mailto:` and friends) are returned unchanged, as is anything that
/// cannot be parsed. Values that already carry the proxy marker are flattened
/// to a single layer, so `wrap(wrap(u, b), b) == wrap(u, b)`.
pub fn wrap(raw: &str, base: &Url) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_passthrough(trimmed) {
        return raw.to_string();
    }

    let resolved = match flatten(trimmed) {
        Some(target) => target,
        None => match base.join(trimmed) {
            Ok(joined) => joined,
            Err(_) => return raw.to_string(),
        },
    };

    if !is_web_scheme(resolved.scheme()) {
        return raw.to_string();
    }

    format!("{PROXY_PREFIX}{resolved}")
}

/// Strips exactly one proxy marker from `proxy_path` and parses the target.
///
/// Accepts the bare form (`/proxy/<url>`) and the absolute form
/// (`http://proxy-host/proxy/<url>`).
pub fn unwrap(proxy_path: &str) -> Result<Url, CodecError> {
    let inner = strip_marker(proxy_path.trim())
        .ok_or_else(|| invalid(proxy_path, "missing /proxy/ prefix"))?;
    parse_target(inner).ok_or_else(|| invalid(proxy_path, "target is not an absolute web URL"))
}

/// Decodes the path-and-query of an inbound request into the canonical URL it
/// addresses, collapsing any extra proxy layers a misbehaving page produced.
pub fn decode_request_target(path_and_query: &str) -> Result<Url, CodecError> {
    let target = unwrap(path_and_query)?;
    Ok(flatten(target.as_str()).unwrap_or(target))
}

/// Parses a user-typed target such as `example.com/page` or a proxy path.
///
/// A missing scheme defaults to `http://`.
pub fn parse_user_target(input: &str) -> Result<Url, CodecError> {
    let trimmed = input.trim();
    if trimmed.starts_with(PROXY_PREFIX) {
        return decode_request_target(trimmed);
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    parse_target(&candidate).ok_or_else(|| invalid(input, "not a fetchable web URL"))
}

/// Peels every proxy layer off `raw` and returns the innermost target.
///
/// Returns `None` when `raw` carries no proxy marker followed by an absolute
/// web URL. Percent-encoded markers (`%2Fproxy%2F`) are decoded first.
pub fn flatten(raw: &str) -> Option<Url> {
    peel(&decode_encoded_marker(raw.trim()))
}

/// Innermost absolute target below one or more proxy markers.
fn peel(value: &str) -> Option<Url> {
    let inner = strip_marker(value)?;
    peel(inner).or_else(|| parse_target(inner))
}

/// `true` for values that must never be rewritten: fragment-only references
/// and in-page schemes.
pub fn is_passthrough(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    trimmed.starts_with('#')
        || PASSTHROUGH_SCHEMES
            .iter()
            .any(|scheme| starts_with_ignore_case(trimmed, scheme))
}

/// `true` for path-relative and root-relative references, i.e. values that
/// only make sense against the document they appear in.
pub fn is_relative(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || is_passthrough(trimmed)
        || trimmed.starts_with("//")
        || trimmed.starts_with(PROXY_PREFIX)
    {
        return false;
    }
    matches!(Url::parse(trimmed), Err(url::ParseError::RelativeUrlWithoutBase))
}

/// Returns the part after the first proxy marker, if `value` starts with one.
fn strip_marker(value: &str) -> Option<&str> {
    if let Some(rest) = value.strip_prefix(PROXY_PREFIX) {
        return Some(rest);
    }

    let after_scheme = strip_prefix_ignore_case(value, "http://")
        .or_else(|| strip_prefix_ignore_case(value, "https://"))?;
    let path_start = after_scheme.find('/')?;
    after_scheme[path_start..].strip_prefix(PROXY_PREFIX)
}

/// Parses the text that followed a proxy marker.
///
/// `https%3A%2F%2F...` is decoded before parsing. Collapsed slashes
/// (`https:/host`) are repaired by the URL parser itself for web schemes.
fn parse_target(inner: &str) -> Option<Url> {
    let decoded = if WEB_SCHEMES
        .iter()
        .any(|scheme| starts_with_ignore_case(inner, &format!("{scheme}%3a")))
    {
        percent_decode_str(inner).decode_utf8().ok()?.into_owned()
    } else {
        inner.to_string()
    };

    let url = Url::parse(&decoded).ok()?;
    is_web_scheme(url.scheme()).then_some(url)
}

fn decode_encoded_marker(raw: &str) -> String {
    let mut current = raw.to_string();
    while current.to_ascii_lowercase().contains(ENCODED_MARKER) {
        let decoded = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }
    current
}

fn is_web_scheme(scheme: &str) -> bool {
    WEB_SCHEMES.contains(&scheme)
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if starts_with_ignore_case(value, prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://site.test/docs/page.html").unwrap()
    }

    // -----------------------------------------------------------------------
    // wrap
    // -----------------------------------------------------------------------

    #[test]
    fn wraps_absolute_url() {
        assert_eq!(
            wrap("http://example.com/x", &base()),
            "/proxy/http://example.com/x"
        );
    }

    #[test]
    fn wraps_root_relative_against_origin() {
        assert_eq!(wrap("/about", &base()), "/proxy/https://site.test/about");
    }

    #[test]
    fn wraps_path_relative_against_document() {
        assert_eq!(
            wrap("img/logo.png", &base()),
            "/proxy/https://site.test/docs/img/logo.png"
        );
        assert_eq!(
            wrap("../style.css", &base()),
            "/proxy/https://site.test/style.css"
        );
    }

    #[test]
    fn wraps_protocol_relative_with_base_scheme() {
        assert_eq!(
            wrap("//cdn.test/lib.js", &base()),
            "/proxy/https://cdn.test/lib.js"
        );
    }

    #[test]
    fn keeps_query_strings() {
        assert_eq!(
            wrap("/search?q=rust&page=2", &base()),
            "/proxy/https://site.test/search?q=rust&page=2"
        );
    }

    #[test]
    fn passthrough_schemes_are_untouched() {
        let b = base();
        assert_eq!(wrap("javascript:alert(1)", &b), "javascript:alert(1)");
        assert_eq!(
            wrap("data:image/png;base64,AAAA", &b),
            "data:image/png;base64,AAAA"
        );
        assert_eq!(wrap("JavaScript:void(0)", &b), "JavaScript:void(0)");
        assert_eq!(wrap("#section-2", &b), "#section-2");
        assert_eq!(wrap("mailto:someone@site.test", &b), "mailto:someone@site.test");
    }

    #[test]
    fn empty_value_is_a_noop() {
        assert_eq!(wrap("", &base()), "");
        assert_eq!(wrap("   ", &base()), "   ");
    }

    #[test]
    fn non_web_scheme_is_left_alone() {
        assert_eq!(wrap("ftp://files.test/a", &base()), "ftp://files.test/a");
    }

    #[test]
    fn already_wrapped_is_unchanged() {
        let wrapped = "/proxy/https://site.test/about";
        assert_eq!(wrap(wrapped, &base()), wrapped);
    }

    #[test]
    fn double_wrapped_collapses() {
        let b = base();
        assert_eq!(
            wrap("/proxy/http://localhost:8080/proxy/https://site.test/a", &b),
            "/proxy/https://site.test/a"
        );
        assert_eq!(
            wrap("/proxy//proxy/https://site.test/a", &b),
            "/proxy/https://site.test/a"
        );
        assert_eq!(
            wrap("http://localhost:8080/proxy/https://site.test/a", &b),
            "/proxy/https://site.test/a"
        );
    }

    #[test]
    fn wrapped_target_with_proxy_segment_is_kept_whole() {
        let wrapped = "/proxy/https://site.test/proxy/settings";
        assert_eq!(wrap(wrapped, &base()), wrapped);
    }

    #[test]
    fn percent_encoded_marker_is_flattened() {
        let b = base();
        assert_eq!(
            wrap("%2Fproxy%2Fhttps%3A%2F%2Fsite.test%2Fa", &b),
            "/proxy/https://site.test/a"
        );
        assert_eq!(
            wrap("/proxy/https%3A%2F%2Fsite.test%2Fb", &b),
            "/proxy/https://site.test/b"
        );
    }

    #[test]
    fn site_path_named_proxy_is_not_mistaken_for_a_wrap() {
        assert_eq!(
            wrap("https://example.com/proxy/settings", &base()),
            "/proxy/https://example.com/proxy/settings"
        );
    }

    #[test]
    fn wrap_is_idempotent() {
        let b = base();
        let inputs = [
            "https://other.test/a?b=1",
            "//cdn.test/x.js",
            "/about",
            "img/logo.png",
            "../up.css",
            "/proxy/https://site.test/about",
            "%2Fproxy%2Fhttps%3A%2F%2Fsite.test%2Fa",
            "javascript:alert(1)",
            "",
        ];
        for input in inputs {
            let once = wrap(input, &b);
            assert_eq!(wrap(&once, &b), once, "not idempotent for {input:?}");
        }
    }

    // -----------------------------------------------------------------------
    // unwrap
    // -----------------------------------------------------------------------

    #[test]
    fn unwrap_round_trips_every_reference_form() {
        let b = base();
        for input in [
            "https://other.test/a?b=1",
            "//cdn.test/x.js",
            "/about",
            "img/logo.png",
            "../up.css",
        ] {
            let expected = b.join(input).unwrap();
            assert_eq!(unwrap(&wrap(input, &b)).unwrap(), expected, "input {input:?}");
        }
    }

    #[test]
    fn unwrap_accepts_absolute_proxy_url() {
        let url = unwrap("http://127.0.0.1:8080/proxy/https://site.test/a").unwrap();
        assert_eq!(url.as_str(), "https://site.test/a");
    }

    #[test]
    fn unwrap_repairs_collapsed_slashes() {
        let url = unwrap("/proxy/https:/site.test/a").unwrap();
        assert_eq!(url.as_str(), "https://site.test/a");
    }

    #[test]
    fn unwrap_strips_only_one_layer() {
        let url = unwrap("/proxy/http://localhost:8080/proxy/https://site.test/a").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/proxy/https://site.test/a");
    }

    #[test]
    fn unwrap_without_prefix_fails() {
        let err = unwrap("/static/app.js").unwrap_err();
        assert!(matches!(err, CodecError::InvalidProxyPath { .. }));
        assert!(err.to_string().contains("missing /proxy/ prefix"));
    }

    #[test]
    fn unwrap_with_relative_target_fails() {
        assert!(unwrap("/proxy/not-a-url").is_err());
        assert!(unwrap("/proxy/").is_err());
    }

    // -----------------------------------------------------------------------
    // decode_request_target / parse_user_target
    // -----------------------------------------------------------------------

    #[test]
    fn request_target_collapses_nested_layers() {
        let url =
            decode_request_target("/proxy/http://localhost:8080/proxy/https://site.test/a?x=1")
                .unwrap();
        assert_eq!(url.as_str(), "https://site.test/a?x=1");
    }

    #[test]
    fn user_target_defaults_to_http() {
        assert_eq!(
            parse_user_target("example.com/page").unwrap().as_str(),
            "http://example.com/page"
        );
        assert_eq!(
            parse_user_target("https://example.com").unwrap().as_str(),
            "https://example.com/"
        );
        assert_eq!(
            parse_user_target("/proxy/https://example.com/a").unwrap().as_str(),
            "https://example.com/a"
        );
    }

    // -----------------------------------------------------------------------
    // classification helpers
    // -----------------------------------------------------------------------

    #[test]
    fn relative_detection() {
        assert!(is_relative("img/a.png"));
        assert!(is_relative("/static/app.js"));
        assert!(is_relative("../x.css"));
        assert!(!is_relative("https://cdn.test/a.js"));
        assert!(!is_relative("//cdn.test/a.js"));
        assert!(!is_relative("data:text/plain,hi"));
        assert!(!is_relative("/proxy/https://site.test/a"));
        assert!(!is_relative(""));
    }
}
