//! Append-only JSON Lines journal of proxy events.
//!
//! Each [`AccessEntry`] is serialised as one newline-terminated JSON object.
//! Producers hold a cheap [`AccessLog`] handle; a single background task owns
//! the file, batches writes and flushes whenever the channel goes idle.
//!
//! ```rust,no_run
//! use access_log::{AccessEntry, AccessEvent, AccessLog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (log, _writer) = AccessLog::start("/var/log/wayfarer/access.jsonl").await?;
//! log.record(
//!     AccessEntry::new(AccessEvent::RequestServed, serde_json::json!({"status": 200}))
//!         .for_target("https://example.com/"),
//! )
//! .await;
//! # Ok(())
//! # }
//! ```

mod entry;
mod sink;
mod writer;

pub use entry::{AccessEntry, AccessEvent};
pub use sink::AccessLog;
pub use writer::{AccessLogWriteError, JournalWriter};
