use std::cell::{Cell, RefCell};

use bytes::Bytes;
use lol_html::element;
use lol_html::html_content::ContentType;
use url::Url;

use crate::context::{ContentKind, RewriteContext, RewriteError};
use crate::dom::{self, Handlers};
use crate::pipeline::RewriteStage;

/// One URL-bearing attribute on one kind of element.
struct UrlAttribute {
    selector: &'static str,
    attribute: &'static str,
    /// Whether a relative value names a sub-resource worth prefetching.
    subresource: bool,
}

const fn attr(selector: &'static str, attribute: &'static str, subresource: bool) -> UrlAttribute {
    UrlAttribute {
        selector,
        attribute,
        subresource,
    }
}

const URL_ATTRIBUTES: &[UrlAttribute] = &[
    attr("a[href]", "href", false),
    attr("area[href]", "href", false),
    attr("link[href]", "href", true),
    attr("script[src]", "src", true),
    attr("img[src]", "src", true),
    attr("iframe[src]", "src", false),
    attr("frame[src]", "src", false),
    attr("form[action]", "action", false),
    attr("button[formaction]", "formaction", false),
    attr("input[formaction]", "formaction", false),
    attr("input[src]", "src", true),
    attr("audio[src]", "src", true),
    attr("video[src]", "src", true),
    attr("video[poster]", "poster", true),
    attr("source[src]", "src", true),
    attr("track[src]", "src", true),
    attr("embed[src]", "src", false),
    attr("object[data]", "data", false),
];

const SRCSET_SELECTORS: &[&str] = &["img[srcset]", "source[srcset]"];

/// `rel` values of `<link>` that point at something the page loads.
const LOADED_LINK_RELS: &[&str] = &[
    "stylesheet",
    "icon",
    "shortcut",
    "apple-touch-icon",
    "preload",
    "modulepreload",
    "manifest",
];

/// Rewrites every URL-bearing attribute of an HTML document into its proxy
/// path and pins the document base with a `<base>` element.
pub struct HtmlAttributeRewrite;

impl RewriteStage for HtmlAttributeRewrite {
    fn name(&self) -> &'static str {
        "html-attributes"
    }

    fn applies_to(&self, kind: ContentKind) -> bool {
        kind == ContentKind::Html
    }

    fn apply(&self, ctx: &mut RewriteContext) -> Result<(), RewriteError> {
        let declared_base = find_base_href(ctx)?;
        if let Some(base) = &declared_base {
            tracing::trace!(%base, "document declares its own base");
            ctx.base_url = base.clone();
        }

        let base = ctx.base_url.clone();
        let document = ctx.document_url.clone();
        let discovered = RefCell::new(Vec::new());
        let head_seen = Cell::new(false);
        // Anchored at the full document URL, not just its origin, so a
        // path-relative reference the rewrite misses still resolves in the
        // document's own directory.
        let injected_base = format!(
            r#"<base href="{}">"#,
            dom::escape_attr(&url_codec::wrap(document.as_str(), &document))
        );

        let mut handlers: Handlers<'_> = Vec::new();

        handlers.push(element!("base[href]", |el| {
            if let Some(href) = el.get_attribute("href") {
                el.set_attribute("href", &url_codec::wrap(&href, &document))?;
            }
            Ok(())
        }));

        handlers.push(element!("head", |el| {
            if !head_seen.replace(true) && declared_base.is_none() {
                el.prepend(&injected_base, ContentType::Html);
            }
            Ok(())
        }));

        for rule in URL_ATTRIBUTES {
            let (base, discovered) = (&base, &discovered);
            handlers.push(element!(rule.selector, move |el| {
                let Some(value) = el.get_attribute(rule.attribute) else {
                    return Ok(());
                };
                let loaded_link = el.tag_name() != "link"
                    || el.get_attribute("rel").is_some_and(|rel| is_loaded_link(&rel));
                if rule.subresource && loaded_link && url_codec::is_relative(&value) {
                    if let Ok(resolved) = base.join(value.trim()) {
                        discovered.borrow_mut().push(resolved);
                    }
                }
                let wrapped = url_codec::wrap(&value, base);
                if wrapped != value {
                    el.set_attribute(rule.attribute, &wrapped)?;
                }
                Ok(())
            }));
        }

        for selector in SRCSET_SELECTORS {
            let (base, discovered) = (&base, &discovered);
            handlers.push(element!(*selector, move |el| {
                if let Some(srcset) = el.get_attribute("srcset") {
                    let (rewritten, relative) = rewrite_srcset(&srcset, base);
                    discovered.borrow_mut().extend(relative);
                    el.set_attribute("srcset", &rewritten)?;
                }
                Ok(())
            }));
        }

        let output = dom::rewrite(&ctx.document_url, &ctx.body, handlers)?;
        let output = if head_seen.get() || declared_base.is_some() {
            output
        } else {
            dom::prepend_markup(&injected_base, output)
        };

        ctx.body = Bytes::from(output);
        ctx.discovered.extend(discovered.into_inner());
        Ok(())
    }
}

/// Resolves the first `<base href>` of the document, if any.
fn find_base_href(ctx: &RewriteContext) -> Result<Option<Url>, RewriteError> {
    let found: RefCell<Option<Url>> = RefCell::new(None);
    let document = &ctx.document_url;
    dom::rewrite(
        document,
        &ctx.body,
        vec![element!("base[href]", |el| {
            let mut found = found.borrow_mut();
            if found.is_none() {
                if let Some(href) = el.get_attribute("href") {
                    *found = url_codec::flatten(&href).or_else(|| document.join(href.trim()).ok());
                }
            }
            Ok(())
        })],
    )?;
    Ok(found.into_inner())
}

fn is_loaded_link(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| LOADED_LINK_RELS.iter().any(|known| token.eq_ignore_ascii_case(known)))
}

/// Wraps every candidate URL of a `srcset` value, keeping the descriptors.
/// Also returns the resolved relative candidates.
fn rewrite_srcset(srcset: &str, base: &Url) -> (String, Vec<Url>) {
    let mut relative = Vec::new();
    let candidates: Vec<String> = srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            let mut parts = candidate.splitn(2, char::is_whitespace);
            let url = parts.next().unwrap_or_default();
            let descriptor = parts.next().map(str::trim).unwrap_or_default();
            if url_codec::is_relative(url) {
                if let Ok(resolved) = base.join(url) {
                    relative.push(resolved);
                }
            }
            let wrapped = url_codec::wrap(url, base);
            if descriptor.is_empty() {
                wrapped
            } else {
                format!("{wrapped} {descriptor}")
            }
        })
        .collect();
    (candidates.join(", "), relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_fetcher::FetchResult;
    use http::{HeaderMap, HeaderValue, StatusCode, header};

    fn run(document: &str, html: &str) -> RewriteContext {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let url = Url::parse(document).unwrap();
        let fetched = FetchResult::new(
            StatusCode::OK,
            headers,
            Bytes::copy_from_slice(html.as_bytes()),
            url.clone(),
        );
        let mut ctx = RewriteContext::new(&url, fetched);
        HtmlAttributeRewrite.apply(&mut ctx).unwrap();
        ctx
    }

    fn body(ctx: &RewriteContext) -> String {
        String::from_utf8(ctx.body.to_vec()).unwrap()
    }

    #[test]
    fn root_relative_anchor() {
        let ctx = run("https://site.test/", r#"<a href="/about">About</a>"#);
        assert!(body(&ctx).contains(r#"<a href="/proxy/https://site.test/about">"#));
    }

    #[test]
    fn already_wrapped_is_unchanged() {
        let ctx = run(
            "https://site.test/",
            r#"<a href="/proxy/https://site.test/about">About</a>"#,
        );
        assert!(body(&ctx).contains(r#"<a href="/proxy/https://site.test/about">"#));
    }

    #[test]
    fn script_schemes_and_fragments_pass_through() {
        let ctx = run(
            "https://site.test/",
            r##"<a href="javascript:alert(1)">x</a><img src="data:image/png;base64,AAAA"><a href="#top">t</a>"##,
        );
        let out = body(&ctx);
        assert!(out.contains(r#"<a href="javascript:alert(1)">"#));
        assert!(out.contains(r#"<img src="data:image/png;base64,AAAA">"#));
        assert!(out.contains(r##"<a href="#top">"##));
        assert!(ctx.discovered.is_empty());
    }

    #[test]
    fn every_url_attribute_is_rewritten() {
        let html = r#"<head><link rel="stylesheet" href="s.css"><script src="//cdn.test/a.js"></script></head>
<body><form action="/go"><button formaction="alt">b</button></form>
<iframe src="https://other.test/embed"></iframe>
<video src="v.mp4" poster="p.jpg"><source src="v.webm"><track src="subs.vtt"></video>
<object data="movie.swf"></object><area href="map"></body>"#;
        let ctx = run("https://site.test/dir/page.html", html);
        let out = body(&ctx);

        for expected in [
            r#"href="/proxy/https://site.test/dir/s.css""#,
            r#"src="/proxy/https://cdn.test/a.js""#,
            r#"action="/proxy/https://site.test/go""#,
            r#"formaction="/proxy/https://site.test/dir/alt""#,
            r#"src="/proxy/https://other.test/embed""#,
            r#"src="/proxy/https://site.test/dir/v.mp4""#,
            r#"poster="/proxy/https://site.test/dir/p.jpg""#,
            r#"src="/proxy/https://site.test/dir/v.webm""#,
            r#"src="/proxy/https://site.test/dir/subs.vtt""#,
            r#"data="/proxy/https://site.test/dir/movie.swf""#,
            r#"href="/proxy/https://site.test/dir/map""#,
        ] {
            assert!(out.contains(expected), "missing {expected} in {out}");
        }
    }

    #[test]
    fn srcset_candidates_are_rewritten_individually() {
        let ctx = run(
            "https://site.test/",
            r#"<img srcset="a.png 1x, https://cdn.test/b.png 2x,c.png">"#,
        );
        assert!(body(&ctx).contains(
            r#"srcset="/proxy/https://site.test/a.png 1x, /proxy/https://cdn.test/b.png 2x, /proxy/https://site.test/c.png""#
        ));
        assert_eq!(
            ctx.discovered,
            vec![
                Url::parse("https://site.test/a.png").unwrap(),
                Url::parse("https://site.test/c.png").unwrap(),
            ]
        );
    }

    #[test]
    fn base_is_injected_first_in_head() {
        let ctx = run(
            "https://site.test/docs/index.html",
            "<html><head><title>t</title></head><body></body></html>",
        );
        assert!(body(&ctx).contains(
            r#"<head><base href="/proxy/https://site.test/docs/index.html"><title>"#
        ));
    }

    #[test]
    fn base_is_prepended_without_head() {
        let ctx = run("https://site.test/", "<p>fragment</p>");
        assert_eq!(
            body(&ctx),
            r#"<base href="/proxy/https://site.test/"><p>fragment</p>"#
        );
    }

    #[test]
    fn declared_base_moves_resolution_and_is_wrapped() {
        let ctx = run(
            "https://site.test/page",
            r#"<head><base href="https://static.test/assets/"></head><body><img src="logo.png"><a href="/x">x</a></body>"#,
        );
        let out = body(&ctx);
        assert!(out.contains(r#"<base href="/proxy/https://static.test/assets/">"#));
        assert!(out.contains(r#"<img src="/proxy/https://static.test/assets/logo.png">"#));
        assert!(out.contains(r#"<a href="/proxy/https://static.test/x">"#));
        assert_eq!(out.matches("<base").count(), 1);
        assert_eq!(ctx.base_url.as_str(), "https://static.test/assets/");
    }

    #[test]
    fn only_relative_subresources_are_discovered() {
        let ctx = run(
            "https://site.test/",
            r#"<head><link rel="stylesheet" href="/main.css"><link rel="canonical" href="/home"><script src="app.js"></script><script src="https://cdn.test/lib.js"></script></head>
<body><a href="/about">a</a><img src="img/logo.png"><iframe src="/frame"></iframe></body>"#,
        );
        let discovered: Vec<&str> = ctx.discovered.iter().map(Url::as_str).collect();
        assert_eq!(
            discovered,
            vec![
                "https://site.test/main.css",
                "https://site.test/app.js",
                "https://site.test/img/logo.png",
            ]
        );
    }
}
