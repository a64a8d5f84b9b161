use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Outcome of a tree cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    MissUnpopulated,
    MissExpired,
    BuildFailed,
}

impl CacheOutcome {
    pub const ALL: [CacheOutcome; 4] = [
        CacheOutcome::Hit,
        CacheOutcome::MissUnpopulated,
        CacheOutcome::MissExpired,
        CacheOutcome::BuildFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::MissUnpopulated => "miss_unpopulated",
            CacheOutcome::MissExpired => "miss_expired",
            CacheOutcome::BuildFailed => "build_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Started,
    Forbidden,
    Failed,
    Completed,
    Cancelled,
}

impl DownloadOutcome {
    pub const ALL: [DownloadOutcome; 5] = [
        DownloadOutcome::Started,
        DownloadOutcome::Forbidden,
        DownloadOutcome::Failed,
        DownloadOutcome::Completed,
        DownloadOutcome::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadOutcome::Started => "started",
            DownloadOutcome::Forbidden => "forbidden",
            DownloadOutcome::Failed => "failed",
            DownloadOutcome::Completed => "completed",
            DownloadOutcome::Cancelled => "cancelled",
        }
    }
}

/// Prometheus metrics used by the gateway.
///
/// Labels are all drawn from fixed sets: host keys and request paths never become label values.
pub struct Metrics {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    tree_cache_lookups_total: IntCounterVec,
    tree_build_duration_seconds: HistogramVec,
    downloads_total: IntCounterVec,
    download_bytes_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let build_info = IntGaugeVec::new(
            Opts::new("ftpgate_build_info", "Build information for ftpgate."),
            &["version"],
        )
        .expect("ftpgate_build_info metric must be valid");
        registry
            .register(Box::new(build_info.clone()))
            .expect("ftpgate_build_info must register");
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests."),
            &["route", "method", "status"],
        )
        .expect("http_requests_total metric must be valid");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("http_requests_total must register");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Time until response headers are ready, in seconds.",
            )
            .buckets(vec![
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["route", "method"],
        )
        .expect("http_request_duration_seconds metric must be valid");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("http_request_duration_seconds must register");

        let tree_cache_lookups_total = IntCounterVec::new(
            Opts::new(
                "tree_cache_lookups_total",
                "Tree cache lookups by outcome.",
            ),
            &["outcome"],
        )
        .expect("tree_cache_lookups_total metric must be valid");
        registry
            .register(Box::new(tree_cache_lookups_total.clone()))
            .expect("tree_cache_lookups_total must register");

        let tree_build_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tree_build_duration_seconds",
                "Time spent walking an FTP server, in seconds.",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["result"],
        )
        .expect("tree_build_duration_seconds metric must be valid");
        registry
            .register(Box::new(tree_build_duration_seconds.clone()))
            .expect("tree_build_duration_seconds must register");

        let downloads_total = IntCounterVec::new(
            Opts::new("downloads_total", "File downloads by outcome."),
            &["outcome"],
        )
        .expect("downloads_total metric must be valid");
        registry
            .register(Box::new(downloads_total.clone()))
            .expect("downloads_total must register");

        let download_bytes_total = IntCounter::new(
            "download_bytes_total",
            "Bytes streamed to clients from FTP transfers.",
        )
        .expect("download_bytes_total metric must be valid");
        registry
            .register(Box::new(download_bytes_total.clone()))
            .expect("download_bytes_total must register");

        let this = Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            tree_cache_lookups_total,
            tree_build_duration_seconds,
            downloads_total,
            download_bytes_total,
        };

        // Stable `/metrics` output before the first request.
        for outcome in CacheOutcome::ALL {
            this.tree_cache_lookups_total
                .with_label_values(&[outcome.as_str()]);
        }
        for outcome in DownloadOutcome::ALL {
            this.downloads_total.with_label_values(&[outcome.as_str()]);
        }

        this
    }

    pub fn observe_http_request(&self, route: &str, method: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[route, method, &status])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route, method])
            .observe(duration.as_secs_f64());
    }

    pub fn inc_cache_lookup(&self, outcome: CacheOutcome) {
        self.tree_cache_lookups_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn observe_tree_build(&self, ok: bool, duration: Duration) {
        let result = if ok { "ok" } else { "error" };
        self.tree_build_duration_seconds
            .with_label_values(&[result])
            .observe(duration.as_secs_f64());
    }

    pub fn inc_download(&self, outcome: DownloadOutcome) {
        self.downloads_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn add_download_bytes(&self, bytes: u64) {
        self.download_bytes_total.inc_by(bytes);
    }

    pub fn cache_lookups(&self, outcome: CacheOutcome) -> u64 {
        self.tree_cache_lookups_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn downloads(&self, outcome: DownloadOutcome) -> u64 {
        self.downloads_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn download_bytes(&self) -> u64 {
        self.download_bytes_total.get()
    }

    pub fn encode(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&metric_families, &mut buf)
            .expect("prometheus encoding must succeed");
        buf
    }

    pub fn metrics_content_type() -> &'static str {
        "text/plain; version=0.0.4"
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
