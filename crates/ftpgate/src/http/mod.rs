//! Gateway HTTP surface: metadata and download requests for any path on any FTP host.

pub mod admin;
pub mod client_ip;
pub(crate) mod cors;
pub(crate) mod observability;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header::RANGE, HeaderMap, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ipnet::IpNet;
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;

use crate::auth::DownloadAuthorizer;
use crate::cache::TreeCache;
use crate::error::GatewayError;
use crate::ftp::TransferEngine;
use crate::host::{mask_host_key, HostCredentials};
use crate::metrics::{DownloadOutcome, Metrics};
use crate::proxy::{stream_file, Download};
use crate::resolve::resolve;
use crate::tree::{NodeRef, NodeResponse};

/// Shared services behind the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    pub cache: Arc<TreeCache>,
    pub authorizer: Arc<DownloadAuthorizer>,
    pub engine: Arc<dyn TransferEngine>,
    pub metrics: Arc<Metrics>,
    pub trusted_proxies: Arc<[IpNet]>,
    pub note: Arc<str>,
    pub max_download_rate: u64,
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub host: Option<String>,
    /// Present (with any value, including none) to request the file's bytes.
    pub download: Option<String>,
}

pub fn router_with_state(state: GatewayState) -> Router {
    let metrics = Arc::clone(&state.metrics);

    Router::new()
        .route("/", get(browse).options(cors::preflight))
        .route("/*path", get(browse).options(cors::preflight))
        .route_layer(CatchPanicLayer::custom(panic_response))
        .route_layer(middleware::from_fn_with_state(
            metrics,
            observability::middleware,
        ))
        .layer(middleware::from_fn(cors::middleware))
        .with_state(state)
}

async fn browse(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    uri: Uri,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, GatewayError> {
    let host_key = query.host.ok_or(GatewayError::MissingHost)?;
    let client = client_ip::client_ip(
        connect_info.map(|ConnectInfo(addr)| addr),
        &headers,
        &state.trusted_proxies,
    );

    let tree = state.cache.get_tree(&host_key).await;
    let node = resolve(&tree, uri.path()).ok_or(GatewayError::NotFound)?;

    if let (NodeRef::File(file), Some(_)) = (node, query.download.as_ref()) {
        if !state.authorizer.check(client) {
            state.metrics.inc_download(DownloadOutcome::Forbidden);
            tracing::info!(
                client = %client,
                host = %mask_host_key(&host_key),
                path = %file.path,
                "download without a valid grant"
            );
            return Err(GatewayError::DownloadForbidden);
        }

        let range = headers.get(RANGE).and_then(|value| value.to_str().ok());
        let response = stream_file(
            state.engine.as_ref(),
            Arc::clone(&state.metrics),
            Download {
                credentials: HostCredentials::parse(&host_key),
                file,
                range,
                max_rate: state.max_download_rate,
            },
        )
        .await?;
        state.authorizer.grant(client);
        return Ok(response);
    }

    state.authorizer.grant(client);
    let body = NodeResponse {
        node: node.view(),
        note: &state.note,
    };
    Ok(Json(body).into_response())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "request handler panicked");
    GatewayError::Internal.into_response()
}
