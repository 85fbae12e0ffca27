//! Coalescing, TTL-bounded cache that sits in front of the slow fetch path.
//!
//! Keys are canonical URLs of the *original* request (before any redirect was
//! followed). Each entry carries its own time-to-live, chosen from one of two
//! classes: [`TtlClass::Page`] for documents and [`TtlClass::Asset`] for
//! scripts, stylesheets and images.
//!
//! [`FetchCache::get_or_try_insert_with`] guarantees that for a given key at
//! most one fetch runs at a time; every concurrent caller awaits and shares
//! that single outcome. The fetch runs on a task owned by the cache, so a
//! caller that goes away does not cancel it. A failed fetch is never stored.

mod cache;
mod policy;

pub use cache::{CacheEntry, FetchCache, InitAbandoned};
pub use policy::{CachePolicy, TtlClass};
