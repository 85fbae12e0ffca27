use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Volatility class of a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Dynamic page content (HTML documents, redirects).
    Page,
    /// Static sub-resources: scripts, stylesheets, images, fonts.
    Asset,
}

/// Sizing and expiry settings for a [`FetchCache`](crate::FetchCache).
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub page_ttl: Duration,
    pub asset_ttl: Duration,
    /// Upper bound on the number of stored entries.
    pub max_entries: u64,
}

impl CachePolicy {
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Page => self.page_ttl,
            TtlClass::Asset => self.asset_ttl,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            page_ttl: Duration::from_secs(300),
            asset_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls_favour_assets() {
        let policy = CachePolicy::default();
        assert_eq!(policy.ttl_for(TtlClass::Page), Duration::from_secs(300));
        assert_eq!(policy.ttl_for(TtlClass::Asset), Duration::from_secs(3600));
        assert!(policy.ttl_for(TtlClass::Asset) > policy.ttl_for(TtlClass::Page));
    }
}
