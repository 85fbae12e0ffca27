use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use access_log::{AccessEntry, AccessEvent, AccessLog};
use bytes::Bytes;
use content_fetcher::{FetchRequest, FetchResult, Fetcher};
use fetch_cache::{FetchCache, TtlClass};
use http::{HeaderMap, Response};
use response_rewriter::{Pipeline, Rewritten};
use url::Url;

use crate::anonymize::{anonymize_headers, upstream_headers};
use crate::error::ProxyError;

/// What the transport hands the orchestrator for one proxied request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Path and query as received, e.g. `/proxy/https://site.test/a?b=c`.
    pub path_and_query: String,
    pub headers: HeaderMap,
}

/// Why a URL is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// A client navigation. Redirects go back to the client, rewritten.
    Document,
    /// A whole page whose redirects are followed upstream, for callers that
    /// want the final document rather than a 3xx.
    Page,
    /// A sub-resource or prefetch. Redirects are followed upstream.
    Resource,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Upstream,
    Substituted,
}

impl Origin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "hit",
            Self::Upstream => "miss",
            Self::Substituted => "substituted",
        }
    }
}

/// A rewritten response plus how it was obtained.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub rewritten: Rewritten,
    pub origin: Origin,
}

/// Cache of rewritten responses shared by every request.
pub type ResponseCache = FetchCache<Rewritten, ProxyError>;

/// Collaborators the orchestrator is wired from.
pub struct OrchestratorParts {
    /// Fetcher for client navigations (usually strategy-selected).
    pub document_fetcher: Arc<dyn Fetcher>,
    /// Fetcher for sub-resources and prefetches.
    pub resource_fetcher: Arc<dyn Fetcher>,
    pub pipeline: Pipeline,
    pub cache: ResponseCache,
    pub access: AccessLog,
}

struct Inner {
    document_fetcher: Arc<dyn Fetcher>,
    resource_fetcher: Arc<dyn Fetcher>,
    pipeline: Pipeline,
    cache: ResponseCache,
    access: AccessLog,
}

/// Wires the codec, cache, fetchers and rewriter together.
///
/// Cheap to clone; every clone shares the same cache and collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                document_fetcher: parts.document_fetcher,
                resource_fetcher: parts.resource_fetcher,
                pipeline: parts.pipeline,
                cache: parts.cache,
                access: parts.access,
            }),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn access(&self) -> &AccessLog {
        &self.inner.access
    }

    /// Answers a `/proxy/<target>` request with the rewritten upstream
    /// response.
    pub async fn handle(&self, request: InboundRequest) -> Result<Response<Bytes>, ProxyError> {
        let url = url_codec::decode_request_target(&request.path_and_query)?;
        let rewritten = self.serve(&url, &request.headers, Purpose::Document).await?;
        Ok(into_response(&rewritten.result))
    }

    /// Loads `url` and, if it had to be fetched, warms the cache with the
    /// sub-resources the rewrite discovered.
    pub async fn serve(
        &self,
        url: &Url,
        client_headers: &HeaderMap,
        purpose: Purpose,
    ) -> Result<Rewritten, ProxyError> {
        let started = Instant::now();
        let loaded = match self.load(url, client_headers, purpose).await {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(%url, %err, "proxied request failed");
                self.inner
                    .access
                    .record(
                        AccessEntry::new(
                            AccessEvent::FetchFailed,
                            serde_json::json!({
                                "error": err.to_string(),
                                "status": err.status().as_u16(),
                            }),
                        )
                        .for_target(url.as_str()),
                    )
                    .await;
                return Err(err);
            }
        };

        if loaded.origin == Origin::Upstream {
            self.schedule_prefetch(&loaded.rewritten.prefetch, client_headers);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            %url,
            status = loaded.rewritten.result.status.as_u16(),
            cache = loaded.origin.as_str(),
            elapsed_ms,
            "request served"
        );
        self.inner
            .access
            .record(
                AccessEntry::new(
                    AccessEvent::RequestServed,
                    serde_json::json!({
                        "status": loaded.rewritten.result.status.as_u16(),
                        "cache": loaded.origin.as_str(),
                        "elapsed_ms": elapsed_ms,
                    }),
                )
                .for_target(url.as_str()),
            )
            .await;

        Ok(loaded.rewritten)
    }

    /// Substitution, then cache, then fetch-and-rewrite. Never schedules
    /// prefetches itself.
    ///
    /// Concurrent loads of the same URL share a single fetch. Errors are not
    /// cached.
    pub async fn load(
        &self,
        url: &Url,
        client_headers: &HeaderMap,
        purpose: Purpose,
    ) -> Result<Loaded, ProxyError> {
        if let Some((rule, stub)) = self.inner.pipeline.substitute(url) {
            let rule = rule.to_string();
            let rewritten = self.inner.pipeline.run(url, stub)?;
            self.inner
                .access
                .record(
                    AccessEntry::new(
                        AccessEvent::ContentSubstituted,
                        serde_json::json!({ "rule": rule }),
                    )
                    .for_target(url.as_str()),
                )
                .await;
            return Ok(Loaded {
                rewritten,
                origin: Origin::Substituted,
            });
        }

        let fetched_here = Arc::new(AtomicBool::new(false));
        let fill = {
            let this = self.clone();
            let url = url.clone();
            let headers = client_headers.clone();
            let fetched_here = Arc::clone(&fetched_here);
            async move {
                fetched_here.store(true, Ordering::Relaxed);
                this.fetch_and_rewrite(&url, &headers, purpose).await
            }
        };
        let rewritten = self
            .inner
            .cache
            .get_or_try_insert_with(url.as_str(), fill)
            .await
            .map_err(|err| (*err).clone())?;

        let origin = if fetched_here.load(Ordering::Relaxed) {
            Origin::Upstream
        } else {
            Origin::Cache
        };
        Ok(Loaded { rewritten, origin })
    }

    async fn fetch_and_rewrite(
        &self,
        url: &Url,
        client_headers: &HeaderMap,
        purpose: Purpose,
    ) -> Result<(Rewritten, TtlClass), ProxyError> {
        let (request, fetcher) = match purpose {
            Purpose::Document => (
                FetchRequest::document(url.clone()),
                &self.inner.document_fetcher,
            ),
            Purpose::Page => (
                FetchRequest::resource(url.clone()),
                &self.inner.document_fetcher,
            ),
            Purpose::Resource => (
                FetchRequest::resource(url.clone()),
                &self.inner.resource_fetcher,
            ),
        };
        let request = request.with_headers(upstream_headers(client_headers));

        let fetched = fetcher.fetch(&request).await?;
        let class = ttl_class(&fetched);
        tracing::debug!(%url, status = fetched.status.as_u16(), ?class, "fetched upstream");

        let rewritten = self.inner.pipeline.run(url, fetched)?;
        Ok((rewritten, class))
    }

    /// Fire-and-forget cache warm-up for `urls`. Failures are logged only.
    fn schedule_prefetch(&self, urls: &[Url], client_headers: &HeaderMap) {
        if urls.is_empty() {
            return;
        }
        tracing::debug!(count = urls.len(), "scheduling prefetch");

        for url in urls {
            let this = self.clone();
            let url = url.clone();
            let headers = client_headers.clone();
            tokio::spawn(async move {
                match this.load(&url, &headers, Purpose::Resource).await {
                    Ok(loaded) => {
                        tracing::trace!(%url, cache = loaded.origin.as_str(), "prefetched");
                    }
                    Err(err) => {
                        tracing::debug!(%url, %err, "prefetch failed");
                        this.inner
                            .access
                            .record(
                                AccessEntry::new(
                                    AccessEvent::PrefetchFailed,
                                    serde_json::json!({ "error": err.to_string() }),
                                )
                                .for_target(url.as_str()),
                            )
                            .await;
                    }
                }
            });
        }
    }
}

/// Documents and redirects are volatile; everything else is a static asset.
fn ttl_class(fetched: &FetchResult) -> TtlClass {
    if fetched.is_html() || fetched.is_redirect() {
        TtlClass::Page
    } else {
        TtlClass::Asset
    }
}

/// Turns a rewritten result into the response sent to the client.
pub fn into_response(result: &FetchResult) -> Response<Bytes> {
    let mut response = Response::new(result.body.clone());
    *response.status_mut() = result.status;
    *response.headers_mut() = result.headers.clone();
    anonymize_headers(response.headers_mut());
    response
}
