use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{FetchError, FetchRequest, FetchResult, Fetcher};

/// Phrases a page uses to announce it is useless without scripts.
pub const DEFAULT_JS_WALL_PATTERN: &str = r"(?i)(please\s+enable|you\s+need\s+to\s+enable|turn\s+on|requires?)\s+javascript|javascript\s+is\s+(disabled|required)";

/// Which retrieval path documents take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Plain HTTP for everything.
    #[default]
    Direct,
    /// Every HTML document goes through the rendering engine; other content
    /// is served as fetched.
    Render,
    /// Plain HTTP first; HTML that demands JavaScript is re-rendered.
    Auto,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Render => "render",
            Self::Auto => "auto",
        })
    }
}

impl FromStr for FetchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "render" => Ok(Self::Render),
            "auto" => Ok(Self::Auto),
            other => Err(format!(
                "unknown fetch strategy '{other}' (expected direct, render or auto)"
            )),
        }
    }
}

/// Dispatches each request to the direct or rendering fetcher according to a
/// [`FetchStrategy`].
pub struct StrategyFetcher {
    strategy: FetchStrategy,
    direct: Arc<dyn Fetcher>,
    render: Option<Arc<dyn Fetcher>>,
    js_wall: Regex,
}

impl StrategyFetcher {
    /// Without a rendering fetcher every strategy degrades to direct.
    pub fn new(
        strategy: FetchStrategy,
        direct: Arc<dyn Fetcher>,
        render: Option<Arc<dyn Fetcher>>,
        js_wall_pattern: &str,
    ) -> Result<Self, regex::Error> {
        if strategy != FetchStrategy::Direct && render.is_none() {
            tracing::warn!(%strategy, "no rendering engine available, fetching directly");
        }
        Ok(Self {
            strategy,
            direct,
            render,
            js_wall: Regex::new(js_wall_pattern)?,
        })
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    fn needs_rendering(&self, result: &FetchResult) -> bool {
        is_document(result) && self.js_wall.is_match(&String::from_utf8_lossy(&result.body))
    }
}

/// Only a successful HTML answer is worth handing to a browser; images,
/// scripts, stylesheets and redirects keep their direct bytes.
fn is_document(result: &FetchResult) -> bool {
    result.status.is_success() && result.is_html()
}

#[async_trait]
impl Fetcher for StrategyFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let Some(render) = &self.render else {
            return self.direct.fetch(request).await;
        };

        match self.strategy {
            FetchStrategy::Direct => self.direct.fetch(request).await,
            FetchStrategy::Render => {
                let direct = self.direct.fetch(request).await?;
                if !is_document(&direct) {
                    return Ok(direct);
                }
                render.fetch(request).await
            }
            FetchStrategy::Auto => {
                let direct = self.direct.fetch(request).await?;
                if !self.needs_rendering(&direct) {
                    return Ok(direct);
                }
                tracing::debug!(url = %request.url, "document requires scripts, rendering");
                match render.fetch(request).await {
                    Ok(rendered) => Ok(rendered),
                    Err(err) => {
                        tracing::warn!(url = %request.url, %err, "rendering failed, serving direct response");
                        Ok(direct)
                    }
                }
            }
        }
    }
}
