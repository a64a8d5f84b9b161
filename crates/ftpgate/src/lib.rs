pub mod auth;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod ftp;
pub mod host;
pub mod http;
pub mod listing;
pub mod metrics;
pub mod proxy;
pub mod resolve;
pub mod server;
pub mod throttle;
pub mod tree;

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;

use auth::{DownloadAuthorizer, DEFAULT_GRANT_TTL};
use builder::WalkLimits;
use cache::{TreeCache, DEFAULT_TREE_TTL};
use config::{Config, DEFAULT_NOTE};
use ftp::{FtpConnector, SuppaFtp, TransferEngine};
use metrics::Metrics;
use throttle::DEFAULT_MAX_RATE;

/// Everything needed to assemble the gateway router.
#[derive(Clone)]
pub struct AppState {
    connector: Arc<dyn FtpConnector>,
    engine: Arc<dyn TransferEngine>,
    metrics: Arc<Metrics>,
    tree_cache_ttl: Duration,
    walk_limits: WalkLimits,
    download_grant_ttl: Duration,
    max_download_rate: u64,
    trusted_proxies: Vec<IpNet>,
    note: String,
}

impl AppState {
    pub fn new(connector: Arc<dyn FtpConnector>, engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            connector,
            engine,
            metrics: Arc::new(Metrics::new()),
            tree_cache_ttl: DEFAULT_TREE_TTL,
            walk_limits: WalkLimits::default(),
            download_grant_ttl: DEFAULT_GRANT_TTL,
            max_download_rate: DEFAULT_MAX_RATE,
            trusted_proxies: Vec::new(),
            note: DEFAULT_NOTE.to_owned(),
        }
    }

    /// Use one backend for both walking servers and transferring files.
    pub fn with_backend<B>(backend: B) -> Self
    where
        B: FtpConnector + TransferEngine + Clone + 'static,
    {
        Self::new(Arc::new(backend.clone()), Arc::new(backend))
    }

    /// Production state: `suppaftp` sessions and every limit taken from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_backend(SuppaFtp::new(config.ftp_timeout))
            .with_tree_cache_ttl(config.tree_cache_ttl)
            .with_walk_limits(WalkLimits {
                max_depth: config.max_tree_depth,
                max_nodes: config.max_tree_nodes,
                op_timeout: config.ftp_timeout,
            })
            .with_download_grant_ttl(config.download_grant_ttl)
            .with_max_download_rate(config.max_download_rate)
            .with_trusted_proxies(config.trusted_proxies.clone())
            .with_note(config.note.clone())
    }

    pub fn with_tree_cache_ttl(mut self, ttl: Duration) -> Self {
        self.tree_cache_ttl = ttl;
        self
    }

    pub fn with_walk_limits(mut self, limits: WalkLimits) -> Self {
        self.walk_limits = limits;
        self
    }

    pub fn with_download_grant_ttl(mut self, ttl: Duration) -> Self {
        self.download_grant_ttl = ttl;
        self
    }

    /// Bytes per second per download; `0` disables the cap.
    pub fn with_max_download_rate(mut self, bytes_per_sec: u64) -> Self {
        self.max_download_rate = bytes_per_sec;
        self
    }

    pub fn with_trusted_proxies(mut self, networks: Vec<IpNet>) -> Self {
        self.trusted_proxies = networks;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}

/// Build the gateway router. Each call gets its own tree cache and download grants.
pub fn app(state: AppState) -> axum::Router {
    let cache = TreeCache::new(
        state.connector,
        state.walk_limits,
        state.tree_cache_ttl,
        Arc::clone(&state.metrics),
    );

    http::router_with_state(http::GatewayState {
        cache: Arc::new(cache),
        authorizer: Arc::new(DownloadAuthorizer::new(state.download_grant_ttl)),
        engine: state.engine,
        metrics: state.metrics,
        trusted_proxies: state.trusted_proxies.into(),
        note: state.note.into(),
        max_download_rate: state.max_download_rate,
    })
}

pub use server::{start, RunningGateway, ServerConfig};
