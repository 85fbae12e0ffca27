use serde::{Deserialize, Serialize};

/// One line of the access journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: AccessEvent,
    /// Canonical URL the event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub details: serde_json::Value,
}

impl AccessEntry {
    /// Stamps a new entry with a fresh v4 id and the current UTC time.
    pub fn new(event: AccessEvent, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event,
            target: None,
            details,
        }
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessEvent {
    ServerStarted,
    ServerStopped,
    /// A proxied document or resource was answered.
    RequestServed,
    /// The primary fetch for a request failed.
    FetchFailed,
    /// A background prefetch failed; the page itself was served.
    PrefetchFailed,
    /// A request was answered by a substitution rule.
    ContentSubstituted,
    /// A WebSocket bridge was opened to an upstream.
    WebSocketBridged,
}
