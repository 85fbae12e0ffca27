use axum::response::{IntoResponse, Response};
use content_fetcher::FetchError;
use fetch_cache::InitAbandoned;
use http::StatusCode;
use response_rewriter::RewriteError;
use url_codec::CodecError;

/// Every way a proxied request can fail.
///
/// `Clone` because coalesced requests share one outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Abandoned(#[from] InitAbandoned),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Codec(_) => StatusCode::BAD_REQUEST,
            Self::Fetch(_) => StatusCode::BAD_GATEWAY,
            Self::Rewrite(_) | Self::Abandoned(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
