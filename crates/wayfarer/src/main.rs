mod cli;
mod config;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use access_log::{AccessEntry, AccessEvent, AccessLog};
use content_fetcher::{
    DirectFetcher, Fetcher, HttpRelayList, RelaySource, StaticRelayList, StrategyFetcher,
};
use fetch_cache::FetchCache;
use proxy_server::{Orchestrator, OrchestratorParts, ProxyServer, ServerConfig};
use response_rewriter::{Pipeline, Substitutions};

use crate::cli::Cli;
use crate::config::{RelayConfig, RenderSettings};

/// How long the access journal gets to drain on exit.
const ACCESS_LOG_DRAIN: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

fn build_relays(cfg: &RelayConfig) -> Result<Option<Arc<dyn RelaySource>>> {
    if !cfg.enabled {
        return Ok(None);
    }
    if let Some(list_url) = &cfg.list_url {
        let list_url = url::Url::parse(list_url).context("invalid relay list URL")?;
        let list = HttpRelayList::new(list_url, Duration::from_secs(cfg.timeout_secs))
            .context("failed to build relay list client")?;
        return Ok(Some(Arc::new(list)));
    }
    if cfg.relays.is_empty() {
        warn!("relays enabled but none configured; connecting directly");
    }
    Ok(Some(Arc::new(StaticRelayList::new(cfg.relays.clone()))))
}

#[cfg(feature = "chromium")]
fn build_renderer(
    cfg: &RenderSettings,
    relays: Option<Arc<dyn RelaySource>>,
) -> Option<Arc<dyn Fetcher>> {
    use content_fetcher::{ChromiumEngine, RenderFetcher};

    let engine = Arc::new(ChromiumEngine::new(cfg.chromium_executable.clone()));
    let mut fetcher = RenderFetcher::new(engine, cfg.render_config());
    if let Some(relays) = relays {
        fetcher = fetcher.with_relays(relays);
    }
    Some(Arc::new(fetcher))
}

#[cfg(not(feature = "chromium"))]
fn build_renderer(
    cfg: &RenderSettings,
    _relays: Option<Arc<dyn RelaySource>>,
) -> Option<Arc<dyn Fetcher>> {
    if cfg.chromium_executable.is_some() {
        warn!("chromium executable configured but wayfarer was built without the chromium feature");
    }
    None
}

fn build_substitutions(path: Option<&Path>) -> Result<Substitutions> {
    let Some(path) = path else {
        return Substitutions::defaults().context("invalid built-in substitution rules");
    };
    let rules = response_rewriter::load_substitutions(path)
        .with_context(|| format!("failed to load substitution file {}", path.display()))?;
    Substitutions::from_config(&rules).context("failed to compile substitution rules")
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        info!("received SIGINT (ctrl-c)");
                    }
                    _ = sigterm.recv() => {
                        info!("received SIGTERM");
                    }
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler; waiting for ctrl-c only");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }
    if let Some(ref static_dir) = cli.static_dir {
        cfg.network.static_dir = static_dir.clone();
    }
    if let Some(strategy) = cli.strategy {
        cfg.fetcher.strategy = strategy;
    }
    if let Some(ref substitutions) = cli.substitutions {
        cfg.substitution_file = Some(substitutions.clone());
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.network.listen_addr,
        strategy = %cfg.fetcher.strategy,
        "wayfarer starting"
    );

    // 4. Start the access journal.
    let (access, access_handle) = match &cfg.logging.access_log_path {
        Some(path) => {
            let (log, handle) = AccessLog::start(path)
                .await
                .context("failed to start access log")?;
            (log, Some(handle))
        }
        None => (AccessLog::disabled(), None),
    };

    // 5. Build the fetchers.
    let relays = build_relays(&cfg.relay)?;

    let mut direct = DirectFetcher::new(cfg.fetcher.direct_config())
        .context("failed to build HTTP client")?;
    if let Some(relays) = relays.clone() {
        direct = direct.with_relays(relays);
    }
    let direct: Arc<dyn Fetcher> = Arc::new(direct);

    let renderer = build_renderer(&cfg.render, relays);
    let documents = StrategyFetcher::new(
        cfg.fetcher.strategy,
        Arc::clone(&direct),
        renderer,
        &cfg.fetcher.js_wall_pattern,
    )
    .context("invalid fetcher.js_wall_pattern")?;

    // 6. Build the rewrite pipeline.
    let substitutions = build_substitutions(cfg.substitution_file.as_deref())?;
    info!(rules = substitutions.len(), "substitution rules loaded");
    let pipeline = Pipeline::standard(&cfg.prefetch.pipeline_config(), substitutions);
    info!(stages = ?pipeline.stage_names(), "rewrite pipeline built");

    // 7. Build the cache and its sweeper.
    let cache = FetchCache::new(cfg.cache.policy());
    let sweeper = cache.spawn_sweeper(cfg.cache.sweep_interval());

    let orchestrator = Orchestrator::new(OrchestratorParts {
        document_fetcher: Arc::new(documents),
        resource_fetcher: direct,
        pipeline,
        cache,
        access: access.clone(),
    });

    // 8. Bind and serve until ctrl-c / SIGTERM.
    let listen_addr: SocketAddr = cfg
        .network
        .listen_addr
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    access
        .record(AccessEntry::new(
            AccessEvent::ServerStarted,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
                "listen": listen_addr.to_string(),
                "strategy": cfg.fetcher.strategy.to_string(),
            }),
        ))
        .await;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let server = ProxyServer::new(
        ServerConfig {
            listen_addr,
            static_dir: cfg.network.static_dir.clone(),
        },
        orchestrator,
    );
    let result = server
        .serve(listener, async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;

    // 9. Tear down.
    info!("wayfarer shutting down");
    sweeper.abort();

    access
        .record(AccessEntry::new(
            AccessEvent::ServerStopped,
            serde_json::json!({
                "result": format!("{:?}", result),
            }),
        ))
        .await;
    drop(access);
    if let Some(handle) = access_handle {
        if tokio::time::timeout(ACCESS_LOG_DRAIN, handle).await.is_err() {
            warn!("access log did not drain in time");
        }
    }

    result
}
