use axum::{
    body::Body,
    http::{
        header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};

use crate::ftp::FtpError;

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing `host` query parameter")]
    MissingHost,
    #[error("not found")]
    NotFound,
    #[error("download not permitted; browse the server before downloading")]
    DownloadForbidden,
    #[error("range not satisfiable")]
    RangeNotSatisfiable { size: u64 },
    #[error("transfer failed")]
    Transfer(#[source] FtpError),
    #[error("internal error")]
    Internal,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHost => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::DownloadForbidden => StatusCode::FORBIDDEN,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Transfer(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let Self::RangeNotSatisfiable { size } = self {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(ACCEPT_RANGES, "bytes")
                .header(CONTENT_RANGE, format!("bytes */{size}"))
                .header(CONTENT_LENGTH, "0")
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response());
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
