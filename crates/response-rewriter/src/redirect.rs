use http::{HeaderValue, header};

use crate::context::{ContentKind, RewriteContext, RewriteError};
use crate::pipeline::RewriteStage;

/// Points `Location` back through the proxy.
pub struct RedirectRewrite;

impl RewriteStage for RedirectRewrite {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn applies_to(&self, kind: ContentKind) -> bool {
        kind == ContentKind::Redirect
    }

    fn apply(&self, ctx: &mut RewriteContext) -> Result<(), RewriteError> {
        let Some(location) = ctx
            .headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(());
        };

        // Only encoded proxy markers and schemes are decoded (inside `wrap`).
        // The rest stays encoded: a blanket decode would turn `%26` or `%2F`
        // inside query values into separators and change the target.
        let wrapped = url_codec::wrap(location, &ctx.request_url);
        if wrapped == location {
            return Ok(());
        }
        match HeaderValue::from_str(&wrapped) {
            Ok(value) => {
                tracing::debug!(from = location, to = %wrapped, "redirect rewritten");
                ctx.headers.insert(header::LOCATION, value);
            }
            Err(err) => {
                tracing::warn!(location, %err, "rewritten Location is not a valid header value");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use content_fetcher::FetchResult;
    use http::{HeaderMap, StatusCode};
    use url::Url;

    fn redirect_to(location: &'static str, request: &str) -> RewriteContext {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static(location));
        let request = Url::parse(request).unwrap();
        let fetched = FetchResult::new(StatusCode::FOUND, headers, Bytes::new(), request.clone());
        RewriteContext::new(&request, fetched)
    }

    fn location(ctx: &RewriteContext) -> &str {
        ctx.headers[header::LOCATION].to_str().unwrap()
    }

    #[test]
    fn absolute_location() {
        let mut ctx = redirect_to("http://example.com/x", "http://example.com/");
        RedirectRewrite.apply(&mut ctx).unwrap();
        assert_eq!(location(&ctx), "/proxy/http://example.com/x");
    }

    #[test]
    fn relative_location_resolves_against_request() {
        let mut ctx = redirect_to("next?page=2", "https://site.test/list/");
        RedirectRewrite.apply(&mut ctx).unwrap();
        assert_eq!(location(&ctx), "/proxy/https://site.test/list/next?page=2");

        let mut ctx = redirect_to("//cdn.test/a", "https://site.test/");
        RedirectRewrite.apply(&mut ctx).unwrap();
        assert_eq!(location(&ctx), "/proxy/https://cdn.test/a");
    }

    #[test]
    fn already_wrapped_location_is_untouched() {
        let mut ctx = redirect_to("/proxy/https://site.test/login", "https://site.test/");
        RedirectRewrite.apply(&mut ctx).unwrap();
        assert_eq!(location(&ctx), "/proxy/https://site.test/login");
    }

    #[test]
    fn encoded_marker_is_flattened() {
        let mut ctx = redirect_to(
            "%2Fproxy%2Fhttps%3A%2F%2Fsite.test%2Fhome",
            "https://site.test/",
        );
        RedirectRewrite.apply(&mut ctx).unwrap();
        assert_eq!(location(&ctx), "/proxy/https://site.test/home");
    }

    #[test]
    fn encoded_query_values_survive() {
        let mut ctx = redirect_to("/search?q=a%26b&next=%2Fhome", "https://site.test/");
        RedirectRewrite.apply(&mut ctx).unwrap();
        assert_eq!(
            location(&ctx),
            "/proxy/https://site.test/search?q=a%26b&next=%2Fhome"
        );
    }
}
