use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::AccessEntry;

#[derive(Debug, thiserror::Error)]
pub enum AccessLogWriteError {
    #[error("failed to create access log directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open access log: {0}")]
    Open(std::io::Error),

    #[error("failed to serialize access entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write access log: {0}")]
    Write(std::io::Error),
}

/// Buffered JSON Lines appender.
pub struct JournalWriter {
    out: BufWriter<File>,
}

impl JournalWriter {
    /// Opens `path` for appending, creating it and its parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AccessLogWriteError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AccessLogWriteError::CreateDir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(AccessLogWriteError::Open)?;

        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub async fn append(&mut self, entry: &AccessEntry) -> Result<(), AccessLogWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.out
            .write_all(&line)
            .await
            .map_err(AccessLogWriteError::Write)
    }

    pub async fn flush(&mut self) -> Result<(), AccessLogWriteError> {
        self.out.flush().await.map_err(AccessLogWriteError::Write)
    }
}
