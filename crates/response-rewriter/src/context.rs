use bytes::Bytes;
use content_fetcher::FetchResult;
use http::{HeaderMap, StatusCode};
use url::Url;

/// How a response is treated by the pipeline. Decided once per response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// An HTML document: every stage applies.
    Html,
    /// A 3xx with a `Location` header.
    Redirect,
    /// Anything else: scripts, styles, images, JSON.
    Other,
}

impl ContentKind {
    pub fn of(result: &FetchResult) -> Self {
        if result.is_redirect() {
            Self::Redirect
        } else if result.is_html() {
            Self::Html
        } else {
            Self::Other
        }
    }
}

/// Scratch state of one pipeline run, owned by exactly one response.
#[derive(Debug)]
pub struct RewriteContext {
    /// URL the client asked for, before any redirect.
    pub request_url: Url,
    /// URL the content was served from.
    pub document_url: Url,
    /// Base for resolving relative references; moved by `<base href>`.
    pub base_url: Url,
    pub kind: ContentKind,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Sub-resources seen while rewriting, in document order.
    pub discovered: Vec<Url>,
    /// Final, bounded prefetch list.
    pub prefetch: Vec<Url>,
}

impl RewriteContext {
    pub fn new(request_url: &Url, fetched: FetchResult) -> Self {
        let kind = ContentKind::of(&fetched);
        Self {
            request_url: request_url.clone(),
            document_url: fetched.final_url.clone(),
            base_url: fetched.final_url.clone(),
            kind,
            status: fetched.status,
            headers: fetched.headers,
            body: fetched.body,
            discovered: Vec::new(),
            prefetch: Vec::new(),
        }
    }

    pub fn is_html(&self) -> bool {
        self.kind == ContentKind::Html
    }

    pub fn into_result(self) -> FetchResult {
        FetchResult::new(self.status, self.headers, self.body, self.document_url)
    }
}

/// Failure of a rewriting stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("failed to rewrite HTML of {url}: {reason}")]
    Html { url: String, reason: String },
}
