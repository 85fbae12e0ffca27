//! Proxy-path codec for the wayfarer rewriting proxy.
//!
//! Every URL that leaves the proxy towards a browser is expressed as a
//! *proxy path*: the fixed marker [`PROXY_PREFIX`] followed by the canonical,
//! fully-qualified URL the resource actually lives at.
//!
//! ```text
//! https://site.test/about   --wrap-->   /proxy/https://site.test/about
//! /proxy/https://site.test/about   --unwrap-->   https://site.test/about
//! ```
//!
//! [`wrap`] is a pure, total function over strings and is idempotent: wrapping
//! something that is already a proxy path (even one that was wrapped several
//! times, or percent-encoded on the way) yields a single-wrapped path. That
//! property is what keeps rewritten pages from growing chains of
//! `/proxy/.../proxy/...` and redirect loops through the proxy itself.
//!
//! ```rust
//! use url::Url;
//! use url_codec::{unwrap, wrap};
//!
//! let base = Url::parse("https://site.test/docs/index.html").unwrap();
//! let wrapped = wrap("/about", &base);
//! assert_eq!(wrapped, "/proxy/https://site.test/about");
//! assert_eq!(wrap(&wrapped, &base), wrapped);
//! assert_eq!(unwrap(&wrapped).unwrap().as_str(), "https://site.test/about");
//! ```

mod codec;

pub use codec::{
    CodecError, PROXY_PREFIX, decode_request_target, flatten, is_passthrough, is_relative,
    parse_user_target, unwrap, wrap,
};
