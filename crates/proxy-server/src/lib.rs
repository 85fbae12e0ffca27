//! Inbound surface of the wayfarer proxy.
//!
//! The [`Orchestrator`] ties the URL codec, fetch cache, content fetcher and
//! response rewriter together; [`ProxyServer`] exposes it over axum next to a
//! WebSocket bridge and the static site.
//!
//! # Architecture
//!
//! ```text
//! Browser --/proxy/<url>--> Orchestrator --miss--> Fetcher --> Pipeline
//!    |                          |                                 |
//!    |                     [FetchCache] <------- store -----------+
//!    |                          |
//!    |                    [prefetch tasks]
//!    |
//!    +--ws upgrade-----> websocket bridge <--WS--> upstream socket
//!    +--anything else--> static files
//! ```
//!
//! Client identity headers are scrubbed on the way upstream and again on the
//! way back.

pub mod anonymize;
pub mod error;
pub mod orchestrator;
mod routes;
pub mod server;
pub mod websocket;

pub use anonymize::{PLACEHOLDER, anonymize_headers, upstream_headers};
pub use error::ProxyError;
pub use orchestrator::{
    InboundRequest, Loaded, Orchestrator, OrchestratorParts, Origin, Purpose, ResponseCache,
    into_response,
};
pub use routes::router;
pub use server::{ProxyServer, ServerConfig};
