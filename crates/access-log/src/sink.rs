use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AccessEntry;
use crate::writer::{AccessLogWriteError, JournalWriter};

const CHANNEL_CAPACITY: usize = 1024;

/// Idle time after which buffered lines are flushed.
const FLUSH_AFTER: Duration = Duration::from_secs(1);

/// Cloneable handle feeding the background journal writer.
///
/// A disabled log (no path configured) accepts and discards entries, so
/// callers never need to branch on whether journaling is on.
#[derive(Clone)]
pub struct AccessLog {
    tx: Option<mpsc::Sender<AccessEntry>>,
}

impl AccessLog {
    /// Opens the journal at `path` and spawns its writer task.
    ///
    /// The task drains entries until every `AccessLog` clone is dropped, then
    /// flushes and exits. Write errors are logged and the entry is skipped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AccessLogWriteError> {
        let writer = JournalWriter::open(path).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(drain(writer, rx));
        Ok((Self { tx: Some(tx) }, handle))
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub async fn record(&self, entry: AccessEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(entry).await {
            tracing::warn!(event = ?err.0.event, "access log writer gone, entry dropped");
        }
    }
}

async fn drain(mut writer: JournalWriter, mut rx: mpsc::Receiver<AccessEntry>) {
    let mut pending = false;
    loop {
        match tokio::time::timeout(FLUSH_AFTER, rx.recv()).await {
            Ok(Some(entry)) => match writer.append(&entry).await {
                Ok(()) => pending = true,
                Err(err) => tracing::error!(%err, "failed to append access entry"),
            },
            Ok(None) => break,
            Err(_idle) if pending => match writer.flush().await {
                Ok(()) => pending = false,
                Err(err) => tracing::error!(%err, "periodic access log flush failed"),
            },
            Err(_idle) => {}
        }
    }

    if let Err(err) = writer.flush().await {
        tracing::error!(%err, "failed to flush access log on shutdown");
    }
    tracing::debug!("access log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AccessEvent;

    #[tokio::test]
    async fn entries_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("access.jsonl");

        let (log, handle) = AccessLog::start(&path).await.unwrap();
        log.record(AccessEntry::new(AccessEvent::ServerStarted, serde_json::json!({"listen": "127.0.0.1:8080"})))
            .await;
        log.record(
            AccessEntry::new(AccessEvent::RequestServed, serde_json::json!({"status": 200}))
                .for_target("https://site.test/"),
        )
        .await;
        drop(log);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<AccessEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event, AccessEvent::ServerStarted);
        assert_eq!(lines[1].event, AccessEvent::RequestServed);
        assert_eq!(lines[1].target.as_deref(), Some("https://site.test/"));
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.jsonl");

        for _ in 0..2 {
            let (log, handle) = AccessLog::start(&path).await.unwrap();
            log.record(AccessEntry::new(AccessEvent::ServerStopped, serde_json::json!({})))
                .await;
            drop(log);
            handle.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn disabled_log_discards_entries() {
        let log = AccessLog::disabled();
        assert!(!log.is_enabled());
        log.record(AccessEntry::new(AccessEvent::FetchFailed, serde_json::json!({})))
            .await;
    }
}
