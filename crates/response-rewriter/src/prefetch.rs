use std::collections::HashSet;

use crate::context::{ContentKind, RewriteContext, RewriteError};
use crate::pipeline::RewriteStage;

/// Turns the sub-resources discovered while rewriting into a bounded,
/// de-duplicated prefetch list. Fetching is left to the caller.
pub struct Prefetch {
    max: usize,
}

impl Prefetch {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl RewriteStage for Prefetch {
    fn name(&self) -> &'static str {
        "prefetch"
    }

    fn applies_to(&self, kind: ContentKind) -> bool {
        kind == ContentKind::Html
    }

    fn apply(&self, ctx: &mut RewriteContext) -> Result<(), RewriteError> {
        let mut seen = HashSet::new();
        let document = ctx.document_url.clone();
        ctx.prefetch = ctx
            .discovered
            .drain(..)
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .filter(|url| *url != document)
            .filter(|url| seen.insert(url.as_str().to_string()))
            .take(self.max)
            .collect();
        Ok(())
    }
}
