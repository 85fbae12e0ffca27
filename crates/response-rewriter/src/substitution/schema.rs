use serde::{Deserialize, Serialize};

/// Top-level substitution file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstitutionConfig {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Keep the built-in rules in addition to the ones listed here.
    #[serde(default = "default_true")]
    pub include_defaults: bool,
    #[serde(default)]
    pub rules: Vec<SubstitutionRule>,
}

/// Replaces every response whose URL matches one of `patterns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstitutionRule {
    /// Human-readable, unique rule name.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Globs matched case-insensitively against `scheme://host/path`
    /// (query and fragment excluded). `*` crosses `/`.
    pub patterns: Vec<String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Replacement body; the built-in inert stub when absent.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/javascript; charset=utf-8".to_string()
}
