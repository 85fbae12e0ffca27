//! Targeted content substitution.
//!
//! Some third-party scripts (bot challenges, mostly) cannot work through a
//! rewriting proxy and only stall the page. Requests for them are answered
//! locally with an inert stand-in instead of being fetched.

mod loader;
mod schema;

use bytes::Bytes;
use content_fetcher::FetchResult;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use url::{Position, Url};

pub use loader::{load_substitutions, load_substitutions_from_str};
pub use schema::{SubstitutionConfig, SubstitutionRule};

/// Inert script that reports success to anything waiting on a challenge.
pub const CHALLENGE_STUB: &str = include_str!("../../assets/challenge-stub.js");

/// Rules compiled into every [`Substitutions::defaults`] set.
const BUILTIN_RULES: &[(&str, &[&str])] = &[
    (
        "cloudflare-challenge-platform",
        &["*://*/cdn-cgi/challenge-platform/*"],
    ),
    (
        "cloudflare-turnstile",
        &["*://challenges.cloudflare.com/turnstile/*"],
    ),
    (
        "recaptcha",
        &[
            "*://www.google.com/recaptcha/*",
            "*://www.gstatic.com/recaptcha/*",
            "*://www.recaptcha.net/recaptcha/*",
        ],
    ),
    (
        "hcaptcha",
        &["*://hcaptcha.com/1/api.js", "*://js.hcaptcha.com/*"],
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("failed to read substitution file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse substitution file: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("unsupported substitution file version '{0}'; only '1.0' is supported")]
    UnsupportedVersion(String),

    #[error("substitution rule name must not be empty")]
    EmptyName,

    #[error("duplicate substitution rule name: '{0}'")]
    DuplicateName(String),

    #[error("substitution rule '{0}' has no patterns")]
    NoPatterns(String),

    #[error("invalid pattern in substitution rule '{rule}': {source}")]
    Pattern {
        rule: String,
        #[source]
        source: globset::Error,
    },
}

struct CompiledRule {
    name: String,
    globs: GlobSet,
    content_type: HeaderValue,
    body: Bytes,
}

impl CompiledRule {
    fn compile(
        name: &str,
        patterns: &[String],
        content_type: &str,
        body: Option<&str>,
    ) -> Result<Self, SubstitutionError> {
        let invalid = |source| SubstitutionError::Pattern {
            rule: name.to_string(),
            source,
        };

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(invalid)?;
            builder.add(glob);
        }

        let content_type = HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/javascript"));
        let body = match body {
            Some(body) => Bytes::copy_from_slice(body.as_bytes()),
            None => Bytes::from_static(CHALLENGE_STUB.as_bytes()),
        };

        Ok(Self {
            name: name.to_string(),
            globs: builder.build().map_err(invalid)?,
            content_type,
            body,
        })
    }
}

/// Ordered set of substitution rules; the first matching rule wins.
#[derive(Default)]
pub struct Substitutions {
    rules: Vec<CompiledRule>,
}

impl Substitutions {
    /// No substitution at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// The built-in bot-challenge rules.
    pub fn defaults() -> Result<Self, SubstitutionError> {
        let rules = builtin_rules()?;
        Ok(Self { rules })
    }

    /// File rules first, then the built-ins unless the file opts out.
    pub fn from_config(config: &SubstitutionConfig) -> Result<Self, SubstitutionError> {
        let mut rules = config
            .rules
            .iter()
            .map(|rule| {
                CompiledRule::compile(
                    &rule.name,
                    &rule.patterns,
                    &rule.content_type,
                    rule.body.as_deref(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        if config.include_defaults {
            rules.extend(builtin_rules()?);
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Name of the first rule matching `url`.
    pub fn matching(&self, url: &Url) -> Option<&str> {
        self.find(url).map(|rule| rule.name.as_str())
    }

    /// Stand-in response for `url`, with the name of the rule that produced it.
    pub fn substitute(&self, url: &Url) -> Option<(&str, FetchResult)> {
        let rule = self.find(url)?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, rule.content_type.clone());
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let result = FetchResult::new(StatusCode::OK, headers, rule.body.clone(), url.clone());
        Some((rule.name.as_str(), result))
    }

    fn find(&self, url: &Url) -> Option<&CompiledRule> {
        let subject = &url[..Position::AfterPath];
        self.rules.iter().find(|rule| rule.globs.is_match(subject))
    }
}

fn builtin_rules() -> Result<Vec<CompiledRule>, SubstitutionError> {
    BUILTIN_RULES
        .iter()
        .map(|(name, patterns)| {
            let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
            CompiledRule::compile(name, &patterns, "application/javascript; charset=utf-8", None)
        })
        .collect()
}
