//! Streams a file from an FTP server into an HTTP response.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::Response,
};
use futures_util::StreamExt;
use ftpgate_http_range::parse_single_range;

use crate::error::GatewayError;
use crate::ftp::{TransferEngine, TransferRequest};
use crate::host::HostCredentials;
use crate::metrics::{DownloadOutcome, Metrics};
use crate::throttle::RateLimiter;
use crate::tree::FileEntry;

/// What to ask the transfer engine for and how to describe it to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub status: StatusCode,
    pub offset: u64,
    /// Bytes to deliver; `None` runs to the end of the file.
    pub len: Option<u64>,
    pub content_range: Option<String>,
    pub content_length: Option<u64>,
}

impl TransferPlan {
    /// The whole file. A known size also caps the transfer so a file that grew since it was
    /// listed cannot overrun `Content-Length`.
    fn full(size: Option<u64>) -> Self {
        Self {
            status: StatusCode::OK,
            offset: 0,
            len: size,
            content_range: None,
            content_length: size,
        }
    }
}

/// Decide how to honor `range` for a file of `size` bytes (if known).
///
/// Only a single `bytes` range is honored. Anything else is ignored and the whole file is
/// sent. With an unknown size, only a closed `first-last` range can be described to the client,
/// so it is the only form honored in that case.
pub fn plan_transfer(size: Option<u64>, range: Option<&str>) -> Result<TransferPlan, GatewayError> {
    let Some(spec) = range.and_then(|value| parse_single_range(value).ok().flatten()) else {
        return Ok(TransferPlan::full(size));
    };

    match size {
        Some(size) => {
            let range = spec
                .resolve(size)
                .ok_or(GatewayError::RangeNotSatisfiable { size })?;
            Ok(TransferPlan {
                status: StatusCode::PARTIAL_CONTENT,
                offset: range.start,
                len: Some(range.len()),
                content_range: Some(range.content_range(size)),
                content_length: Some(range.len()),
            })
        }
        None => match spec.window_without_length() {
            Some((offset, Some(len))) => Ok(TransferPlan {
                status: StatusCode::PARTIAL_CONTENT,
                offset,
                len: Some(len),
                content_range: Some(format!("bytes {}-{}/*", offset, offset + len - 1)),
                content_length: Some(len),
            }),
            _ => Ok(TransferPlan::full(None)),
        },
    }
}

pub struct Download<'a> {
    pub credentials: HostCredentials,
    pub file: &'a FileEntry,
    pub range: Option<&'a str>,
    pub max_rate: u64,
}

/// Open the transfer and build the streaming response.
///
/// Fails only before headers are produced. Errors after that end the body early; dropping the
/// body cancels the transfer.
pub async fn stream_file(
    engine: &dyn TransferEngine,
    metrics: Arc<Metrics>,
    download: Download<'_>,
) -> Result<Response, GatewayError> {
    let plan = plan_transfer(download.file.size, download.range)?;
    let path = download.file.path.clone();

    let request = TransferRequest {
        credentials: download.credentials,
        path: path.clone(),
        offset: plan.offset,
        len: plan.len,
    };
    let mut upstream = match engine.open(request).await {
        Ok(stream) => stream,
        Err(err) => {
            metrics.inc_download(DownloadOutcome::Failed);
            tracing::error!(path = %path, error = %err, "failed to open transfer");
            return Err(GatewayError::Transfer(err));
        }
    };

    metrics.inc_download(DownloadOutcome::Started);
    tracing::info!(
        path = %path,
        offset = plan.offset,
        len = plan.len,
        "download started"
    );

    let max_rate = download.max_rate;
    let expected = plan.content_length;
    let mut guard = DownloadGuard::new(metrics, path);
    let body = async_stream::stream! {
        let mut limiter = RateLimiter::new(max_rate);
        while let Some(chunk) = upstream.next().await {
            let mut bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    guard.failed(&err);
                    yield Err(err);
                    return;
                }
            };
            let mut oversized = false;
            if let Some(len) = expected {
                let remaining = len.saturating_sub(guard.sent);
                if bytes.len() as u64 > remaining {
                    bytes.truncate(remaining as usize);
                    oversized = true;
                }
            }
            limiter.consume(bytes.len()).await;
            guard.sent(bytes.len());

            if Some(guard.sent) == expected {
                // Once Content-Length is satisfied the server stops polling this body, so the
                // transfer has to wind down before the last chunk goes out.
                match upstream.next().await {
                    None => {}
                    Some(Ok(_)) => oversized = true,
                    Some(Err(err)) => tracing::debug!(
                        parent: &guard.span,
                        path = %guard.path,
                        error = %err,
                        "transfer did not close cleanly"
                    ),
                }
                if oversized {
                    tracing::warn!(
                        parent: &guard.span,
                        path = %guard.path,
                        "file is larger than its listed size; truncating"
                    );
                }
                guard.completed();
                if !bytes.is_empty() {
                    yield Ok(bytes);
                }
                return;
            }
            yield Ok(bytes);
        }

        match expected {
            Some(len) if guard.sent < len => {
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("transfer ended after {} of {len} bytes", guard.sent),
                );
                guard.failed(&err);
                yield Err(err);
            }
            _ => guard.completed(),
        }
    };

    let mut builder = Response::builder()
        .status(plan.status)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(ACCEPT_RANGES, "bytes");
    if let Some(len) = plan.content_length {
        builder = builder.header(CONTENT_LENGTH, HeaderValue::from(len));
    }
    if let Some(content_range) = plan.content_range {
        builder = builder.header(CONTENT_RANGE, content_range);
    }
    builder
        .body(Body::from_stream(body))
        .map_err(|err| {
            tracing::error!(error = %err, "failed to build download response");
            GatewayError::Internal
        })
}

/// Tracks one download and reports how it ended, including when the response body is dropped
/// before the transfer finished.
struct DownloadGuard {
    metrics: Arc<Metrics>,
    path: String,
    sent: u64,
    span: tracing::Span,
    finished: bool,
}

impl DownloadGuard {
    fn new(metrics: Arc<Metrics>, path: String) -> Self {
        Self {
            metrics,
            path,
            sent: 0,
            span: tracing::Span::current(),
            finished: false,
        }
    }

    fn sent(&mut self, len: usize) {
        self.sent += len as u64;
        self.metrics.add_download_bytes(len as u64);
    }

    fn completed(&mut self) {
        self.finished = true;
        self.metrics.inc_download(DownloadOutcome::Completed);
        tracing::info!(parent: &self.span, path = %self.path, bytes = self.sent, "download completed");
    }

    fn failed(&mut self, err: &io::Error) {
        self.finished = true;
        self.metrics.inc_download(DownloadOutcome::Failed);
        tracing::warn!(
            parent: &self.span,
            path = %self.path,
            bytes = self.sent,
            error = %err,
            "download failed mid-stream"
        );
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.inc_download(DownloadOutcome::Cancelled);
            tracing::info!(parent: &self.span, path = %self.path, bytes = self.sent, "download cancelled");
        }
    }
}
