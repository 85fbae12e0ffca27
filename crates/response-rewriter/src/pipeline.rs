use content_fetcher::FetchResult;
use url::Url;

use crate::context::{ContentKind, RewriteContext, RewriteError};
use crate::headers::SecurityHeaders;
use crate::html::HtmlAttributeRewrite;
use crate::prefetch::Prefetch;
use crate::redirect::RedirectRewrite;
use crate::shim::ShimInjection;
use crate::substitution::Substitutions;

/// One transformation applied to a response.
///
/// Stages are synchronous and perform no I/O; anything that needs the
/// network (prefetching) is only *described* in the context and carried out
/// by the caller.
pub trait RewriteStage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the stage runs for responses of `kind`.
    fn applies_to(&self, kind: ContentKind) -> bool;

    fn apply(&self, ctx: &mut RewriteContext) -> Result<(), RewriteError>;
}

/// Tunables for [`Pipeline::standard`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prefetch_enabled: bool,
    /// Upper bound on prefetches scheduled per document.
    pub max_prefetch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefetch_enabled: true,
            max_prefetch: 32,
        }
    }
}

/// Outcome of a pipeline run: the response to serve and the sub-resources
/// worth warming the cache with.
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub result: FetchResult,
    pub prefetch: Vec<Url>,
}

/// Ordered list of [`RewriteStage`]s plus the substitution policy consulted
/// before anything is fetched.
pub struct Pipeline {
    stages: Vec<Box<dyn RewriteStage>>,
    substitutions: Substitutions,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn RewriteStage>>, substitutions: Substitutions) -> Self {
        Self {
            stages,
            substitutions,
        }
    }

    /// Redirect, security headers, HTML attributes, shim, prefetch.
    pub fn standard(config: &PipelineConfig, substitutions: Substitutions) -> Self {
        let max_prefetch = if config.prefetch_enabled {
            config.max_prefetch
        } else {
            0
        };
        Self::new(
            vec![
                Box::new(RedirectRewrite),
                Box::new(SecurityHeaders),
                Box::new(HtmlAttributeRewrite),
                Box::new(ShimInjection),
                Box::new(Prefetch::new(max_prefetch)),
            ],
            substitutions,
        )
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Stub response replacing `url` entirely, with the name of the matching
    /// substitution rule.
    pub fn substitute(&self, url: &Url) -> Option<(&str, FetchResult)> {
        let (rule, result) = self.substitutions.substitute(url)?;
        tracing::debug!(%url, rule, "substituting response");
        Some((rule, result))
    }

    /// Threads `fetched` through every applicable stage in order.
    pub fn run(&self, request_url: &Url, fetched: FetchResult) -> Result<Rewritten, RewriteError> {
        let mut ctx = RewriteContext::new(request_url, fetched);
        for stage in &self.stages {
            if !stage.applies_to(ctx.kind) {
                continue;
            }
            stage.apply(&mut ctx)?;
            tracing::trace!(stage = stage.name(), url = %ctx.request_url, "rewrite stage applied");
        }
        let prefetch = std::mem::take(&mut ctx.prefetch);
        Ok(Rewritten {
            result: ctx.into_result(),
            prefetch,
        })
    }
}
