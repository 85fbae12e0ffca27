//! Streaming HTML plumbing shared by the HTML stages.

use std::borrow::Cow;

use lol_html::{ElementContentHandlers, HtmlRewriter, Selector, Settings};
use url::Url;

use crate::context::RewriteError;

pub(crate) type Handlers<'h> = Vec<(Cow<'static, Selector>, ElementContentHandlers<'h>)>;

/// Runs `html` through one streaming rewrite pass.
pub(crate) fn rewrite(document: &Url, html: &[u8], handlers: Handlers<'_>) -> Result<Vec<u8>, RewriteError> {
    let mut output = Vec::with_capacity(html.len() + 1024);
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::new()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );

    rewriter
        .write(html)
        .and_then(|()| rewriter.end())
        .map_err(|err| RewriteError::Html {
            url: document.to_string(),
            reason: err.to_string(),
        })?;

    Ok(output)
}

/// Escapes a value for use inside a double-quoted attribute.
pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// `markup` followed by `body`, for documents that have no `<head>` to hold it.
pub(crate) fn prepend_markup(markup: &str, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(markup.len() + body.len());
    out.extend_from_slice(markup.as_bytes());
    out.extend(body);
    out
}
