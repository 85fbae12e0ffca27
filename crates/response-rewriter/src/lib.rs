//! Response rewriting pipeline for the wayfarer proxy.
//!
//! A fetched response is classified once into a [`ContentKind`] and then
//! threaded through an ordered list of [`RewriteStage`]s sharing one
//! [`RewriteContext`]:
//!
//! ```text
//! Fetched -> redirect -> security headers -> (HTML attributes -> shim -> prefetch) -> Final
//!                                            \_________ HTML documents only ________/
//! ```
//!
//! Every URL the pipeline touches is re-encoded with [`url_codec::wrap`] so
//! the browser only ever addresses the proxy. HTML is rewritten in streaming
//! passes with `lol_html`; no DOM is ever built.
//!
//! Independently of the stages, a [`Substitutions`] policy can answer a
//! request with an inert stand-in before anything is fetched.

mod context;
mod dom;
mod headers;
mod html;
mod pipeline;
mod prefetch;
mod redirect;
mod shim;
pub mod substitution;

pub use context::{ContentKind, RewriteContext, RewriteError};
pub use headers::{PERMISSIVE_CSP, SecurityHeaders};
pub use html::HtmlAttributeRewrite;
pub use pipeline::{Pipeline, PipelineConfig, RewriteStage, Rewritten};
pub use prefetch::Prefetch;
pub use redirect::RedirectRewrite;
pub use shim::{SHIM_SCRIPT, ShimInjection};
pub use substitution::{
    CHALLENGE_STUB, SubstitutionConfig, SubstitutionError, SubstitutionRule, Substitutions,
    load_substitutions, load_substitutions_from_str,
};
