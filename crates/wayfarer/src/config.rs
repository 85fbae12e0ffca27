use content_fetcher::{
    DEFAULT_JS_WALL_PATTERN, DEFAULT_USER_AGENT, DirectConfig, FetchStrategy, RenderConfig,
};
use fetch_cache::CachePolicy;
use response_rewriter::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Optional substitution rules file; the built-in rules apply without one.
    #[serde(default)]
    pub substitution_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            static_dir: default_static_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_page_ttl")]
    pub page_ttl_secs: u64,
    #[serde(default = "default_asset_ttl")]
    pub asset_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_ttl_secs: default_page_ttl(),
            asset_ttl_secs: default_asset_ttl(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            page_ttl: Duration::from_secs(self.page_ttl_secs),
            asset_ttl: Duration::from_secs(self.asset_ttl_secs),
            max_entries: self.max_entries,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize)]
pub struct FetcherConfig {
    #[serde(default)]
    pub strategy: FetchStrategy,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Regex marking HTML that needs a rendering pass under `auto`.
    #[serde(default = "default_js_wall_pattern")]
    pub js_wall_pattern: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            strategy: FetchStrategy::default(),
            max_redirects: default_max_redirects(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            js_wall_pattern: default_js_wall_pattern(),
        }
    }
}

impl FetcherConfig {
    pub fn direct_config(&self) -> DirectConfig {
        DirectConfig {
            user_agent: self.user_agent.clone(),
            max_redirects: self.max_redirects,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub stealth: bool,
    /// Browser binary; autodetected when unset.
    #[serde(default)]
    pub chromium_executable: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_render_timeout(),
            stealth: default_true(),
            chromium_executable: None,
        }
    }
}

impl RenderSettings {
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            stealth: self.stealth,
            ..RenderConfig::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Plain-text list of `host:port` relays, fetched on every call.
    #[serde(default)]
    pub list_url: Option<String>,
    /// Fixed relays, used when no `list_url` is given.
    #[serde(default)]
    pub relays: Vec<String>,
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            list_url: None,
            relays: Vec::new(),
            timeout_secs: default_relay_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_prefetch")]
    pub max_per_page: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_per_page: default_max_prefetch(),
        }
    }
}

impl PrefetchConfig {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            prefetch_enabled: self.enabled,
            max_prefetch: self.max_per_page,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Access journal path; `null` disables the journal.
    #[serde(default = "default_access_path")]
    pub access_log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            access_log_path: default_access_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_page_ttl() -> u64 {
    300
}

fn default_asset_ttl() -> u64 {
    3600
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_redirects() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_js_wall_pattern() -> String {
    DEFAULT_JS_WALL_PATTERN.to_string()
}

fn default_render_timeout() -> u64 {
    30
}

fn default_relay_timeout() -> u64 {
    10
}

fn default_max_prefetch() -> usize {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_access_path() -> Option<PathBuf> {
    Some(PathBuf::from("access.jsonl"))
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted, so the proxy starts with sensible defaults when no
/// config file has been written yet.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.yaml")).unwrap();

        assert_eq!(config.network.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.cache.page_ttl_secs, 300);
        assert_eq!(config.cache.asset_ttl_secs, 3600);
        assert_eq!(config.fetcher.strategy, FetchStrategy::Direct);
        assert_eq!(config.fetcher.user_agent, DEFAULT_USER_AGENT);
        assert!(config.prefetch.enabled);
        assert!(!config.relay.enabled);
        assert_eq!(
            config.logging.access_log_path,
            Some(PathBuf::from("access.jsonl"))
        );
        assert!(config.substitution_file.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayfarer.yaml");
        std::fs::write(
            &path,
            r#"
network:
  listen_addr: "0.0.0.0:9000"
fetcher:
  strategy: auto
  max_redirects: 3
cache:
  page_ttl_secs: 60
relay:
  enabled: true
  relays: ["10.0.0.1:3128"]
logging:
  access_log_path: null
substitution_file: rules.yaml
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.network.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.network.static_dir, PathBuf::from("static"));
        assert_eq!(config.fetcher.strategy, FetchStrategy::Auto);
        assert_eq!(config.fetcher.direct_config().max_redirects, 3);
        assert_eq!(config.cache.policy().page_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.policy().asset_ttl, Duration::from_secs(3600));
        assert_eq!(config.relay.relays, vec!["10.0.0.1:3128".to_string()]);
        assert!(config.logging.access_log_path.is_none());
        assert_eq!(config.substitution_file, Some(PathBuf::from("rules.yaml")));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayfarer.yaml");
        std::fs::write(&path, "fetcher:\n  strategy: telepathy\n").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn disabled_prefetch_reaches_the_pipeline() {
        let config = PrefetchConfig {
            enabled: false,
            max_per_page: 8,
        };
        assert!(!config.pipeline_config().prefetch_enabled);
    }
}
