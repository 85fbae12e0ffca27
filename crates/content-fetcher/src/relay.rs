use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use url::Url;

/// Failure to obtain the list of outbound relays.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to download relay list from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("relay list at {url} answered {status}")]
    Status { url: String, status: u16 },
}

/// Supplies candidate outbound relays as `host:port` strings.
#[async_trait]
pub trait RelaySource: Send + Sync {
    async fn fetch_relay_list(&self) -> Result<Vec<String>, RelayError>;
}

/// A fixed, in-memory relay list.
#[derive(Debug, Clone, Default)]
pub struct StaticRelayList {
    relays: Vec<String>,
}

impl StaticRelayList {
    pub fn new(relays: Vec<String>) -> Self {
        Self { relays }
    }
}

#[async_trait]
impl RelaySource for StaticRelayList {
    async fn fetch_relay_list(&self) -> Result<Vec<String>, RelayError> {
        Ok(self.relays.clone())
    }
}

/// Downloads a plain-text relay list: one `host:port` per line, blank lines
/// and `#` comments ignored.
pub struct HttpRelayList {
    client: reqwest::Client,
    list_url: Url,
}

impl HttpRelayList {
    pub fn new(list_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, list_url })
    }
}

#[async_trait]
impl RelaySource for HttpRelayList {
    async fn fetch_relay_list(&self) -> Result<Vec<String>, RelayError> {
        let download = |source| RelayError::Download {
            url: self.list_url.to_string(),
            source,
        };

        let response = self
            .client
            .get(self.list_url.clone())
            .send()
            .await
            .map_err(download)?;
        if !response.status().is_success() {
            return Err(RelayError::Status {
                url: self.list_url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let text = response.text().await.map_err(download)?;
        Ok(parse_relay_list(&text))
    }
}

/// Parses the newline-separated relay list format.
pub fn parse_relay_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Picks a random relay, or `None` when there is no source, the list cannot be
/// fetched, or it is empty. Never fails: the caller connects directly instead.
pub(crate) async fn pick_relay(source: Option<&Arc<dyn RelaySource>>) -> Option<String> {
    let source = source?;
    let relays = match source.fetch_relay_list().await {
        Ok(relays) => relays,
        Err(err) => {
            tracing::warn!(%err, "relay list unavailable, connecting directly");
            return None;
        }
    };
    let picked = relays.choose(&mut rand::rng()).cloned();
    if picked.is_none() {
        tracing::warn!("relay list is empty, connecting directly");
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenRelays;

    #[async_trait]
    impl RelaySource for BrokenRelays {
        async fn fetch_relay_list(&self) -> Result<Vec<String>, RelayError> {
            Err(RelayError::Status {
                url: "http://relays.test/list.txt".into(),
                status: 503,
            })
        }
    }

    #[test]
    fn parses_lines_and_skips_comments() {
        let text = "# relays\n10.0.0.1:8080\n\n  10.0.0.2:3128  # backup\n#10.0.0.3:1\n";
        assert_eq!(
            parse_relay_list(text),
            vec!["10.0.0.1:8080".to_string(), "10.0.0.2:3128".to_string()]
        );
    }

    #[tokio::test]
    async fn picks_one_of_the_listed_relays() {
        let listed = vec!["a:1".to_string(), "b:2".to_string()];
        let source: Arc<dyn RelaySource> = Arc::new(StaticRelayList::new(listed.clone()));
        let picked = pick_relay(Some(&source)).await.unwrap();
        assert!(listed.contains(&picked));
    }

    #[tokio::test]
    async fn falls_back_when_list_is_empty_or_broken() {
        let empty: Arc<dyn RelaySource> = Arc::new(StaticRelayList::default());
        assert!(pick_relay(Some(&empty)).await.is_none());

        let broken: Arc<dyn RelaySource> = Arc::new(BrokenRelays);
        assert!(pick_relay(Some(&broken)).await.is_none());

        assert!(pick_relay(None).await.is_none());
    }
}
