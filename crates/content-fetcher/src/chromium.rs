//! Headless Chromium back end, driven over the DevTools protocol.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use url::Url;

use crate::render::{
    LaunchOptions, NavigateOptions, RenderEngine, RenderError, RenderPage, RenderSession,
    WaitUntil,
};

/// Masks the usual automation giveaways before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

/// Quiet period after the load event standing in for network idle.
const IDLE_GRACE: Duration = Duration::from_millis(500);

/// Launches one Chromium process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumEngine {
    executable: Option<PathBuf>,
}

impl ChromiumEngine {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn RenderSession>, RenderError> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport.width, options.viewport.height)
            .arg(format!("--user-agent={}", options.user_agent))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if options.stealth {
            builder = builder.arg("--disable-blink-features=AutomationControlled");
        }
        if let Some(relay) = &options.proxy_server {
            builder = builder.arg(format!("--proxy-server=http://{relay}"));
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| RenderError::Launch(err.to_string()))?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            browser,
            events: Some(events),
            stealth: options.stealth,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    events: Option<JoinHandle<()>>,
    stealth: bool,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn new_page(&mut self) -> Result<Box<dyn RenderPage>, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|err| RenderError::Page(err.to_string()))?;
        if self.stealth {
            page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
                STEALTH_SCRIPT,
            ))
            .await
            .map_err(|err| RenderError::Page(err.to_string()))?;
        }
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        let closed = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|err| RenderError::Page(err.to_string()));
        let _ = self.browser.wait().await;
        if let Some(events) = self.events.take() {
            events.abort();
        }
        closed
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl RenderPage for ChromiumPage {
    async fn goto(&mut self, url: &Url, options: NavigateOptions) -> Result<(), RenderError> {
        self.page
            .goto(url.as_str())
            .await
            .map_err(|err| RenderError::Navigation(err.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| RenderError::Navigation(err.to_string()))?;
        if options.wait_until == WaitUntil::NetworkIdle {
            tokio::time::sleep(IDLE_GRACE.min(options.timeout)).await;
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.page
            .content()
            .await
            .map_err(|err| RenderError::Page(err.to_string()))
    }

    async fn url(&mut self) -> Result<Option<Url>, RenderError> {
        let current = self
            .page
            .url()
            .await
            .map_err(|err| RenderError::Page(err.to_string()))?;
        Ok(current.and_then(|raw| Url::parse(&raw).ok()))
    }
}
