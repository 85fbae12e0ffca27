use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use tokio::sync::oneshot;
use url::Url;

use crate::direct::DEFAULT_USER_AGENT;
use crate::relay::{RelaySource, pick_relay};
use crate::types::{FetchError, FetchRequest, FetchResult, Fetcher};

/// User agents a rendering session may present itself as.
pub const PLAUSIBLE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
];

/// Errors raised by a rendering back end.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to launch rendering session: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page operation failed: {0}")]
    Page(String),
}

/// Browser window dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Parameters for a fresh, isolated rendering session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub user_agent: String,
    pub viewport: Viewport,
    /// `host:port` of an outbound relay, if one was picked.
    pub proxy_server: Option<String>,
    /// Suppress automation fingerprints (webdriver flag, headless markers).
    pub stealth: bool,
}

/// Navigation completion condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
}

/// A headless rendering engine.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// One launched, isolated browser instance.
///
/// [`close`](Self::close) must be called exactly once when the session is no
/// longer needed.
#[async_trait]
pub trait RenderSession: Send {
    async fn new_page(&mut self) -> Result<Box<dyn RenderPage>, RenderError>;
    async fn close(&mut self) -> Result<(), RenderError>;
}

#[async_trait]
pub trait RenderPage: Send {
    async fn goto(&mut self, url: &Url, options: NavigateOptions) -> Result<(), RenderError>;
    /// Serialized DOM of the current document.
    async fn content(&mut self) -> Result<String, RenderError>;
    /// Current (post-redirect) document URL.
    async fn url(&mut self) -> Result<Option<Url>, RenderError>;
}

/// Settings for [`RenderFetcher`].
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Upper bound on navigation plus extraction.
    pub timeout: Duration,
    pub stealth: bool,
    /// Candidates for the randomized user agent; empty means the direct
    /// fetcher's default.
    pub user_agents: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            stealth: true,
            user_agents: PLAUSIBLE_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
        }
    }
}

/// Retrieves the post-script DOM of a document through a [`RenderEngine`].
pub struct RenderFetcher {
    engine: Arc<dyn RenderEngine>,
    config: RenderConfig,
    relays: Option<Arc<dyn RelaySource>>,
}

impl RenderFetcher {
    pub fn new(engine: Arc<dyn RenderEngine>, config: RenderConfig) -> Self {
        Self {
            engine,
            config,
            relays: None,
        }
    }

    pub fn with_relays(mut self, relays: Arc<dyn RelaySource>) -> Self {
        self.relays = Some(relays);
        self
    }

    async fn launch_options(&self) -> LaunchOptions {
        let proxy_server = pick_relay(self.relays.as_ref()).await;
        let mut rng = rand::rng();
        let user_agent = self
            .config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let viewport = Viewport {
            width: rng.random_range(1280..=1920),
            height: rng.random_range(720..=1080),
        };
        LaunchOptions {
            user_agent,
            viewport,
            proxy_server,
            stealth: self.config.stealth,
        }
    }
}

async fn render(
    session: &mut dyn RenderSession,
    url: &Url,
    options: NavigateOptions,
) -> Result<(String, Url), RenderError> {
    let mut page = session.new_page().await?;
    page.goto(url, options).await?;
    let html = page.content().await?;
    let final_url = page.url().await?.unwrap_or_else(|| url.clone());
    Ok((html, final_url))
}

/// Launches a session, renders `url` and closes the session again.
///
/// Runs on its own task so the session is closed even when the caller stops
/// waiting; a caller that goes away cuts the render short.
async fn run_session(
    engine: Arc<dyn RenderEngine>,
    options: LaunchOptions,
    url: Url,
    timeout: Duration,
    mut reply: oneshot::Sender<Result<FetchResult, FetchError>>,
) {
    let mut session = match engine.launch(options).await {
        Ok(session) => session,
        Err(err) => {
            let _ = reply.send(Err(FetchError::RenderSessionFailure {
                reason: err.to_string(),
            }));
            return;
        }
    };

    let navigate = NavigateOptions {
        wait_until: WaitUntil::NetworkIdle,
        timeout,
    };
    let outcome = tokio::select! {
        outcome = tokio::time::timeout(timeout, render(session.as_mut(), &url, navigate)) => Some(outcome),
        _ = reply.closed() => None,
    };

    if let Err(err) = session.close().await {
        tracing::warn!(%url, %err, "failed to close render session");
    }

    let result = match outcome {
        Some(Ok(Ok((html, final_url)))) => Ok(FetchResult::html(html, final_url)),
        Some(Ok(Err(err))) => Err(FetchError::RenderSessionFailure {
            reason: err.to_string(),
        }),
        Some(Err(_)) => Err(FetchError::failure(
            &url,
            format!("render timed out after {timeout:?}"),
        )),
        None => {
            tracing::debug!(%url, "render abandoned by caller");
            return;
        }
    };
    let _ = reply.send(result);
}

#[async_trait]
impl Fetcher for RenderFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let options = self.launch_options().await;
        tracing::debug!(
            url = %request.url,
            user_agent = %options.user_agent,
            width = options.viewport.width,
            height = options.viewport.height,
            relay = options.proxy_server.as_deref().unwrap_or("<direct>"),
            "launching render session"
        );

        let (reply, outcome) = oneshot::channel();
        tokio::spawn(run_session(
            Arc::clone(&self.engine),
            options,
            request.url.clone(),
            self.config.timeout,
            reply,
        ));

        outcome.await.unwrap_or_else(|_| {
            Err(FetchError::RenderSessionFailure {
                reason: "render task ended without a result".into(),
            })
        })
    }
}
