use bytes::Bytes;
use http::{HeaderValue, header};
use lol_html::element;

use crate::context::{ContentKind, RewriteContext, RewriteError};
use crate::dom;
use crate::pipeline::RewriteStage;

/// Policy installed in place of whatever the origin sent.
pub const PERMISSIVE_CSP: &str =
    "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:; frame-ancestors *";

/// Headers that would stop the rewritten page from loading through the proxy.
const BLOCKING_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "strict-transport-security",
    "cross-origin-opener-policy",
    "cross-origin-embedder-policy",
    "cross-origin-resource-policy",
];

/// Framing and hop-by-hop headers invalidated once the body is rewritten or
/// re-encoded.
const FRAMING_HEADERS: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "connection",
    "keep-alive",
];

/// Strips origin security policy that would block proxied content and
/// installs a permissive one.
pub struct SecurityHeaders;

impl RewriteStage for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security-headers"
    }

    fn applies_to(&self, _kind: ContentKind) -> bool {
        true
    }

    fn apply(&self, ctx: &mut RewriteContext) -> Result<(), RewriteError> {
        for name in BLOCKING_HEADERS.iter().chain(FRAMING_HEADERS) {
            ctx.headers.remove(*name);
        }

        ctx.headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(PERMISSIVE_CSP),
        );
        ctx.headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );

        if ctx.is_html() {
            ctx.body = Bytes::from(strip_meta_csp(ctx)?);
        }
        Ok(())
    }
}

fn strip_meta_csp(ctx: &RewriteContext) -> Result<Vec<u8>, RewriteError> {
    dom::rewrite(
        &ctx.document_url,
        &ctx.body,
        vec![element!("meta[http-equiv]", |el| {
            let is_csp = el.get_attribute("http-equiv").is_some_and(|value| {
                let value = value.trim();
                value.eq_ignore_ascii_case("content-security-policy")
                    || value.eq_ignore_ascii_case("content-security-policy-report-only")
            });
            if is_csp {
                el.remove();
            }
            Ok(())
        })],
    )
}
