use std::cell::Cell;

use bytes::Bytes;
use lol_html::element;
use lol_html::html_content::ContentType;

use crate::context::{ContentKind, RewriteContext, RewriteError};
use crate::dom;
use crate::pipeline::RewriteStage;

/// Client-side counterpart of [`url_codec::wrap`], patching the browser APIs
/// that take URLs at runtime.
pub const SHIM_SCRIPT: &str = include_str!("../assets/shim.js");

/// Places the runtime shim as the very first element of `<head>`.
pub struct ShimInjection;

impl ShimInjection {
    pub fn script_tag() -> String {
        format!("<script>{SHIM_SCRIPT}</script>")
    }
}

impl RewriteStage for ShimInjection {
    fn name(&self) -> &'static str {
        "shim"
    }

    fn applies_to(&self, kind: ContentKind) -> bool {
        kind == ContentKind::Html
    }

    fn apply(&self, ctx: &mut RewriteContext) -> Result<(), RewriteError> {
        let tag = Self::script_tag();
        let injected = Cell::new(false);

        let output = dom::rewrite(
            &ctx.document_url,
            &ctx.body,
            vec![element!("head", |el| {
                if !injected.replace(true) {
                    el.prepend(&tag, ContentType::Html);
                }
                Ok(())
            })],
        )?;

        let output = if injected.get() {
            output
        } else {
            dom::prepend_markup(&tag, output)
        };
        ctx.body = Bytes::from(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_fetcher::FetchResult;
    use http::{HeaderMap, HeaderValue, StatusCode, header};
    use url::Url;

    fn run(html: &'static str) -> String {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let url = Url::parse("https://site.test/").unwrap();
        let fetched = FetchResult::new(StatusCode::OK, headers, Bytes::from_static(html.as_bytes()), url.clone());
        let mut ctx = RewriteContext::new(&url, fetched);
        ShimInjection.apply(&mut ctx).unwrap();
        String::from_utf8(ctx.body.to_vec()).unwrap()
    }

    #[test]
    fn shim_is_first_in_head() {
        let out = run(r#"<html><head><script src="/app.js"></script></head><body></body></html>"#);
        assert!(out.starts_with("<html><head><script>(function ()"));
        assert!(out.find(SHIM_SCRIPT).unwrap() < out.find(r#"src="/app.js""#).unwrap());
        assert_eq!(out.matches("__wayfarerShim = true").count(), 1);
    }

    #[test]
    fn documents_without_head_get_the_shim_up_front() {
        let out = run("<p>bare</p>");
        assert!(out.starts_with("<script>"));
        assert!(out.ends_with("<p>bare</p>"));
    }

    #[test]
    fn shim_patches_every_runtime_entry_point() {
        for hook in [
            "window.fetch =",
            "XMLHttpRequest.prototype.open =",
            "window.open =",
            "'pushState', 'replaceState'",
            "window.WebSocket =",
            "navigator.sendBeacon =",
        ] {
            assert!(SHIM_SCRIPT.contains(hook), "shim does not patch {hook}");
        }
    }

    #[test]
    fn proxy_origin_urls_are_moved_onto_the_target() {
        assert!(SHIM_SCRIPT.contains("function retarget(resolved)"));
        assert!(SHIM_SCRIPT.contains("resolved.host !== location.host"));
        assert!(SHIM_SCRIPT.contains("resolved = retarget(resolved);"));
    }
}
