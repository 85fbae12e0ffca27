//! Upstream retrieval for the wayfarer proxy.
//!
//! Everything that talks to origin servers goes through the [`Fetcher`]
//! contract: given a canonical URL, produce its status, headers and body.
//! Three implementations are provided:
//!
//! * [`DirectFetcher`] -- plain HTTP(S) with a browser-like identity. It never
//!   lets the HTTP client follow redirects on its own; a request either gets
//!   the 3xx back (documents, so the client can be redirected through the
//!   proxy) or has the hops followed here (sub-resources).
//! * [`RenderFetcher`] -- drives a headless browser through the
//!   [`RenderEngine`] contract and returns the post-script DOM. Sessions are
//!   bounded by a timeout and always closed. The Chromium back end lives
//!   behind the `chromium` cargo feature.
//! * [`StrategyFetcher`] -- picks between the two per [`FetchStrategy`].
//!
//! Both concrete fetchers may route through an outbound relay taken from a
//! [`RelaySource`]; when no relay can be had they connect directly.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod direct;
pub mod relay;
pub mod render;
pub mod strategy;
pub mod types;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumEngine;
pub use direct::{DEFAULT_USER_AGENT, DirectConfig, DirectFetcher};
pub use relay::{HttpRelayList, RelayError, RelaySource, StaticRelayList, parse_relay_list};
pub use render::{
    LaunchOptions, NavigateOptions, RenderConfig, RenderEngine, RenderError, RenderFetcher,
    RenderPage, RenderSession, Viewport, WaitUntil,
};
pub use strategy::{DEFAULT_JS_WALL_PATTERN, FetchStrategy, StrategyFetcher};
pub use types::{FetchError, FetchRequest, FetchResult, Fetcher};
