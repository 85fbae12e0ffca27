use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use url::Url;

/// A single outbound retrieval.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Canonical URL to retrieve.
    pub url: Url,
    /// When `false`, a 3xx answer is returned to the caller as-is so the
    /// redirect can be rewritten for the client.
    pub follow_redirects: bool,
    /// Extra headers sent upstream on top of the fetcher's own browser set.
    pub headers: HeaderMap,
}

impl FetchRequest {
    /// A document request: redirects are handed back to the caller.
    pub fn document(url: Url) -> Self {
        Self {
            url,
            follow_redirects: false,
            headers: HeaderMap::new(),
        }
    }

    /// A sub-resource request: redirects are followed by the fetcher.
    pub fn resource(url: Url) -> Self {
        Self {
            url,
            follow_redirects: true,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Raw upstream response. Immutable once produced.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// Canonical URL the content was actually served from, after redirects.
    pub final_url: Url,
}

impl FetchResult {
    /// Builds a result, deriving `content_type` from the headers.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, final_url: Url) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            status,
            headers,
            content_type,
            body,
            final_url,
        }
    }

    /// A `200 OK` HTML document, as produced by the rendering strategy.
    pub fn html(body: impl Into<Bytes>, final_url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        Self::new(StatusCode::OK, headers, body.into(), final_url)
    }

    /// Media type without parameters, lowercased.
    pub fn mime(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn is_html(&self) -> bool {
        matches!(
            self.mime().as_deref(),
            Some("text/html") | Some("application/xhtml+xml")
        )
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.headers.contains_key(header::LOCATION)
    }
}

/// Errors surfaced by every [`Fetcher`].
///
/// `Clone` because one outcome is shared by every request coalesced onto the
/// same fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("failed to fetch {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("render session failed: {reason}")]
    RenderSessionFailure { reason: String },

    #[error("too many redirects (limit {limit}) while fetching {url}")]
    RedirectLoop { url: String, limit: usize },
}

impl FetchError {
    pub(crate) fn failure(url: &Url, reason: impl ToString) -> Self {
        Self::FetchFailure {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Retrieves raw content for a canonical URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError>;
}
