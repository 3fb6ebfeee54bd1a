//! 统一的 HTTP 错误类型与启动错误。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::storage::StorageError;

pub const AUTH_REALM: &str = r#"Basic realm="Accio""#;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound,
    Unauthorized(String),
    TooManyRequests(u64),
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Entry not found").into_response(),
            ApiError::Unauthorized(msg) => {
                let mut headers = HeaderMap::new();
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM));
                (StatusCode::UNAUTHORIZED, headers, msg).into_response()
            }
            ApiError::TooManyRequests(retry_after) => {
                let mut headers = HeaderMap::new();
                if retry_after > 0
                    && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
                {
                    headers.insert(header::RETRY_AFTER, value);
                }
                (StatusCode::TOO_MANY_REQUESTS, headers, "Too many requests").into_response()
            }
            ApiError::RangeNotSatisfiable(size) => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    headers,
                    "Range not satisfiable",
                )
                    .into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::Io(err) => {
                warn!(error = %err, "filesystem error while serving entry");
                if err.kind() == std::io::ErrorKind::NotFound {
                    ApiError::NotFound
                } else {
                    ApiError::Internal("Failed to read entry".into())
                }
            }
        }
    }
}

/// 启动阶段的致命错误，进程在开始服务前退出。
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid base directory {path:?}: {reason}")]
    InvalidBaseDir { path: PathBuf, reason: String },
    #[error(
        "failed to prepare uploads directory: primary {primary:?} ({primary_reason}); fallback {fallback:?} ({fallback_reason})"
    )]
    UploadsDir {
        primary: PathBuf,
        primary_reason: String,
        fallback: PathBuf,
        fallback_reason: String,
    },
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_carries_challenge() {
        let response = ApiError::Unauthorized("Authentication required".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).map(|v| v.as_bytes()),
            Some(AUTH_REALM.as_bytes())
        );
    }

    #[test]
    fn storage_errors_collapse_to_not_found() {
        let response = ApiError::from(StorageError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let response = ApiError::from(StorageError::Io(io)).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
