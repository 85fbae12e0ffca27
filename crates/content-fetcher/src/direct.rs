use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header};
use url::Url;

use crate::relay::{RelaySource, pick_relay};
use crate::types::{FetchError, FetchRequest, FetchResult, Fetcher};

/// Desktop Chrome on Windows.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Settings for [`DirectFetcher`].
#[derive(Debug, Clone)]
pub struct DirectConfig {
    pub user_agent: String,
    /// Redirect hops followed before giving up with
    /// [`FetchError::RedirectLoop`].
    pub max_redirects: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 10,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Plain HTTP(S) retrieval with a browser-like header set.
///
/// Automatic redirects are disabled on the underlying client; hops are
/// followed here so the caller decides whether a 3xx is terminal.
pub struct DirectFetcher {
    client: reqwest::Client,
    config: DirectConfig,
    relays: Option<Arc<dyn RelaySource>>,
    /// One pooled client per relay seen so far.
    relay_clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl DirectFetcher {
    pub fn new(config: DirectConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(&config, None)?;
        Ok(Self {
            client,
            config,
            relays: None,
            relay_clients: Mutex::new(HashMap::new()),
        })
    }

    /// Routes every call through a relay picked from `relays`, falling back
    /// to a direct connection whenever none can be had.
    pub fn with_relays(mut self, relays: Arc<dyn RelaySource>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn config(&self) -> &DirectConfig {
        &self.config
    }

    async fn client_for_call(&self) -> reqwest::Client {
        let Some(relay) = pick_relay(self.relays.as_ref()).await else {
            return self.client.clone();
        };
        let mut clients = self
            .relay_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&relay) {
            tracing::debug!(%relay, "fetching through relay");
            return client.clone();
        }
        match build_client(&self.config, Some(&relay)) {
            Ok(client) => {
                tracing::debug!(%relay, "fetching through new relay");
                clients.insert(relay, client.clone());
                client
            }
            Err(err) => {
                tracing::warn!(%relay, %err, "unusable relay, connecting directly");
                self.client.clone()
            }
        }
    }
}

fn build_client(config: &DirectConfig, relay: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
    );

    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout);

    if let Some(relay) = relay {
        builder = builder.proxy(reqwest::Proxy::all(format!("http://{relay}"))?);
    }

    builder.build()
}

/// Resolves the `Location` of a redirect against the URL that produced it.
fn redirect_target(current: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(header::LOCATION)?.to_str().ok()?;
    current.join(location.trim()).ok()
}

#[async_trait]
impl Fetcher for DirectFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let client = self.client_for_call().await;
        let mut current = request.url.clone();

        for hop in 0..=self.config.max_redirects {
            let response = client
                .get(current.clone())
                .headers(request.headers.clone())
                .send()
                .await
                .map_err(|err| FetchError::failure(&current, err))?;

            let status = response.status();
            if status.is_redirection() && request.follow_redirects {
                if let Some(next) = redirect_target(&current, response.headers()) {
                    tracing::debug!(from = %current, to = %next, hop, "following redirect");
                    current = next;
                    continue;
                }
            }

            if !(status.is_success() || status.is_redirection()) {
                return Err(FetchError::failure(
                    &current,
                    format!("upstream answered {status}"),
                ));
            }

            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|err| FetchError::failure(&current, err))?;

            tracing::debug!(url = %current, %status, bytes = body.len(), "fetched");
            return Ok(FetchResult::new(status, headers, body, current));
        }

        Err(FetchError::RedirectLoop {
            url: current.to_string(),
            limit: self.config.max_redirects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{RelayError, StaticRelayList};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::net::SocketAddr;

    async fn upstream() -> SocketAddr {
        let app = Router::new()
            .route(
                "/page",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html")],
                        "<html><body>hi</body></html>",
                    )
                }),
            )
            .route(
                "/hop",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/page")]) }),
            )
            .route(
                "/loop",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/loop")]) }),
            )
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "gone") }),
            )
            .route(
                "/headers",
                get(|headers: axum::http::HeaderMap| async move {
                    let ua = headers
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let via = headers
                        .get("via")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    format!("{ua}|{via}")
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn at(addr: SocketAddr, path: &str) -> Url {
        Url::parse(&format!("http://{addr}{path}")).unwrap()
    }

    fn fetcher(max_redirects: usize) -> DirectFetcher {
        DirectFetcher::new(DirectConfig {
            max_redirects,
            ..DirectConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_a_document() {
        let addr = upstream().await;
        let result = fetcher(10)
            .fetch(&FetchRequest::document(at(addr, "/page")))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert!(result.is_html());
        assert_eq!(&result.body[..], b"<html><body>hi</body></html>");
        assert_eq!(result.final_url, at(addr, "/page"));
    }

    #[tokio::test]
    async fn document_request_returns_redirect_unfollowed() {
        let addr = upstream().await;
        let result = fetcher(10)
            .fetch(&FetchRequest::document(at(addr, "/hop")))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::FOUND);
        assert!(result.is_redirect());
        assert_eq!(result.final_url, at(addr, "/hop"));
    }

    #[tokio::test]
    async fn resource_request_follows_redirects() {
        let addr = upstream().await;
        let result = fetcher(10)
            .fetch(&FetchRequest::resource(at(addr, "/hop")))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(result.final_url, at(addr, "/page"));
    }

    #[tokio::test]
    async fn endless_redirects_hit_the_limit() {
        let addr = upstream().await;
        let err = fetcher(3)
            .fetch(&FetchRequest::resource(at(addr, "/loop")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::RedirectLoop {
                url: at(addr, "/loop").to_string(),
                limit: 3,
            }
        );
    }

    #[tokio::test]
    async fn error_status_is_a_fetch_failure() {
        let addr = upstream().await;
        let err = fetcher(10)
            .fetch(&FetchRequest::document(at(addr, "/missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::FetchFailure { ref reason, .. } if reason.contains("404")));
    }

    #[tokio::test]
    async fn refused_connection_is_a_fetch_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(10)
            .fetch(&FetchRequest::document(at(addr, "/")))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::FetchFailure { .. }));
    }

    #[tokio::test]
    async fn sends_browser_identity_and_extra_headers() {
        let addr = upstream().await;
        let mut extra = HeaderMap::new();
        extra.insert("via", HeaderValue::from_static("0.0.0.0"));
        let result = fetcher(10)
            .fetch(&FetchRequest::document(at(addr, "/headers")).with_headers(extra))
            .await
            .unwrap();
        let echoed = String::from_utf8(result.body.to_vec()).unwrap();
        assert_eq!(echoed, format!("{DEFAULT_USER_AGENT}|0.0.0.0"));
    }

    struct BrokenRelays;

    #[async_trait]
    impl RelaySource for BrokenRelays {
        async fn fetch_relay_list(&self) -> Result<Vec<String>, RelayError> {
            Err(RelayError::Status {
                url: "http://relays.test/".into(),
                status: 500,
            })
        }
    }

    #[tokio::test]
    async fn relay_clients_are_reused() {
        let fetcher = fetcher(10).with_relays(Arc::new(StaticRelayList::new(vec![
            "127.0.0.1:3128".to_string(),
        ])));
        for _ in 0..3 {
            fetcher.client_for_call().await;
        }
        assert_eq!(fetcher.relay_clients.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn relay_failure_falls_back_to_direct() {
        let addr = upstream().await;
        for relays in [
            Arc::new(BrokenRelays) as Arc<dyn RelaySource>,
            Arc::new(StaticRelayList::default()),
        ] {
            let result = fetcher(10)
                .with_relays(relays)
                .fetch(&FetchRequest::document(at(addr, "/page")))
                .await
                .unwrap();
            assert_eq!(result.status, StatusCode::OK);
        }
    }
}
