use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use ipnet::IpNet;

use crate::builder::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES};
use crate::throttle::DEFAULT_MAX_RATE;

pub const DEFAULT_NOTE: &str = "No files are hosted on this server, this is simply a router";

#[derive(Debug, Clone, Parser)]
#[command(name = "ftpgate", version, about)]
pub struct Args {
    /// Address the gateway listens on.
    #[arg(long, env = "FTPGATE_LISTEN_ADDR", default_value = "0.0.0.0:80")]
    pub listen_addr: SocketAddr,

    /// Address of the admin listener serving `/metrics` and `/healthz`. Disabled when unset.
    #[arg(long, env = "FTPGATE_ADMIN_ADDR")]
    pub admin_addr: Option<SocketAddr>,

    /// How long a walked directory tree is served before the server is walked again.
    #[arg(long, env = "FTPGATE_TREE_CACHE_TTL_SECS", default_value_t = 600)]
    pub tree_cache_ttl_secs: u64,

    /// Bound for connecting, logging in and each FTP command.
    #[arg(long, env = "FTPGATE_FTP_TIMEOUT_SECS", default_value_t = 30)]
    pub ftp_timeout_secs: u64,

    /// How long a client may download after browsing.
    #[arg(long, env = "FTPGATE_DOWNLOAD_GRANT_TTL_SECS", default_value_t = 1800)]
    pub download_grant_ttl_secs: u64,

    /// Per-download rate cap in bytes per second. `0` disables the cap.
    #[arg(long, env = "FTPGATE_MAX_DOWNLOAD_RATE", default_value_t = DEFAULT_MAX_RATE)]
    pub max_download_rate: u64,

    #[arg(long, env = "FTPGATE_MAX_TREE_DEPTH", default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_tree_depth: usize,

    #[arg(long, env = "FTPGATE_MAX_TREE_NODES", default_value_t = DEFAULT_MAX_NODES)]
    pub max_tree_nodes: usize,

    /// Networks of reverse proxies whose `X-Forwarded-For` header is trusted (comma-separated
    /// CIDRs).
    #[arg(long, env = "FTPGATE_TRUSTED_PROXIES", value_delimiter = ',')]
    pub trusted_proxies: Vec<String>,

    /// Static note attached to every metadata response.
    #[arg(long, env = "FTPGATE_NOTE", default_value = DEFAULT_NOTE)]
    pub note: String,

    /// Log filter (tracing-subscriber EnvFilter syntax), used when `RUST_LOG` is unset.
    #[arg(long, env = "FTPGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    pub tree_cache_ttl: Duration,
    pub ftp_timeout: Duration,
    pub download_grant_ttl: Duration,
    pub max_download_rate: u64,
    pub max_tree_depth: usize,
    pub max_tree_nodes: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub note: String,
    pub log_level: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid trusted proxy network {value:?}: {message}")]
    TrustedProxy { value: String, message: String },
}

impl Config {
    /// Parse the command line (with environment fallbacks) and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        Self::try_from_args(Args::parse())
    }

    pub fn try_from_args(args: Args) -> Result<Self, ConfigError> {
        let nonzero = |value: u64, name: &'static str| {
            if value == 0 {
                Err(ConfigError::Zero(name))
            } else {
                Ok(Duration::from_secs(value))
            }
        };
        let tree_cache_ttl = nonzero(args.tree_cache_ttl_secs, "tree cache TTL")?;
        let ftp_timeout = nonzero(args.ftp_timeout_secs, "FTP timeout")?;
        let download_grant_ttl = nonzero(args.download_grant_ttl_secs, "download grant TTL")?;
        if args.max_tree_depth == 0 {
            return Err(ConfigError::Zero("max tree depth"));
        }
        if args.max_tree_nodes == 0 {
            return Err(ConfigError::Zero("max tree nodes"));
        }

        let trusted_proxies = args
            .trusted_proxies
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(parse_network)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            listen_addr: args.listen_addr,
            admin_addr: args.admin_addr,
            tree_cache_ttl,
            ftp_timeout,
            download_grant_ttl,
            max_download_rate: args.max_download_rate,
            max_tree_depth: args.max_tree_depth,
            max_tree_nodes: args.max_tree_nodes,
            trusted_proxies,
            note: args.note,
            log_level: args.log_level,
        })
    }
}

/// A CIDR, or a bare address meaning that single host.
fn parse_network(value: &str) -> Result<IpNet, ConfigError> {
    value
        .parse::<IpNet>()
        .or_else(|err| {
            value
                .parse::<std::net::IpAddr>()
                .map(IpNet::from)
                .map_err(|_| err)
        })
        .map_err(|err| ConfigError::TrustedProxy {
            value: value.to_owned(),
            message: err.to_string(),
        })
}
