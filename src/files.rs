//! 目录浏览与文件下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use futures_util::TryStreamExt;
use httpdate::{fmt_http_date, parse_http_date};
use serde::Deserialize;
use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::assets::index_template;
use crate::config::STREAM_CHUNK_SIZE;
use crate::error::ApiError;
use crate::listing::render_listing;
use crate::paths::{
    contains_parent_traversal, decode_request_path, encode_segment, normalize_relative_path,
};
use crate::storage::{ResolvedEntry, Storage};

#[derive(Deserialize)]
pub(crate) struct EntryQuery {
    path: Option<String>,
}

/// 浏览目录或下载文件（GET/HEAD）。
pub async fn serve_entry(
    uri: Uri,
    Query(query): Query<EntryQuery>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let raw = match query.path.filter(|path| !path.is_empty()) {
        Some(path) => path,
        None => decode_request_path(uri.path()),
    };
    if contains_parent_traversal(&raw) {
        warn!(path = raw, "rejected traversal attempt");
        return Err(ApiError::Forbidden("Forbidden path".into()));
    }
    let relative = normalize_relative_path(&raw);
    let entry = storage.resolve_entry(&relative).await?;

    if entry.metadata.is_dir() {
        let entries = storage.list_dir(&entry.path).await?;
        info!(path = relative, count = entries.len(), "list directory");
        let html = render_listing(&relative, &entries, &index_template());
        return Ok(Html(html).into_response());
    }
    if !entry.metadata.is_file() {
        return Err(ApiError::NotFound);
    }
    download_file(&relative, entry, &request_headers).await
}

/// 下载文件，按固定大小分块流式输出，支持单一 Range 请求。
async fn download_file(
    relative: &str,
    entry: ResolvedEntry,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let ResolvedEntry { path, metadata } = entry;
    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(&file_name_of(&path)))?,
    );
    if let Some(ts) = modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(ts))?);
    }
    response_headers.insert(header::ETAG, header_value(&etag_from_metadata(&metadata))?);

    let if_range_matches = match request_headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => match parse_http_date(value) {
            Ok(date) => modified.map(|ts| ts <= date).unwrap_or(false),
            Err(_) => false,
        },
        None => true,
    };
    let range = if if_range_matches {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let mut file = File::open(&path)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let (status, length, body) = match range {
        Some((start, end)) => {
            let length = end - start + 1;
            debug!(path = relative, start, end, length, "range request accepted");
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            response_headers.insert(
                header::CONTENT_RANGE,
                header_value(&format!("bytes {start}-{end}/{file_size}"))?,
            );
            (
                StatusCode::PARTIAL_CONTENT,
                length,
                stream_body(relative, file.take(length)),
            )
        }
        None => {
            info!(path = relative, size = file_size, "download file");
            (StatusCode::OK, file_size, stream_body(relative, file))
        }
    };
    response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);

    Ok((status, response_headers, body).into_response())
}

/// 读取失败时记录日志并让响应体报错，连接被中断而不是静默截断。
fn stream_body<R>(relative: &str, reader: R) -> AxumBody
where
    R: tokio::io::AsyncRead + Send + 'static,
{
    let relative = relative.to_string();
    let stream = ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE).inspect_err(move |err| {
        warn!(path = relative, error = %err, "download aborted");
    });
    AxumBody::from_stream(stream)
}

/// 构建 `attachment` 头：ASCII 兜底名加 UTF-8 百分号编码名。
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if !ch.is_ascii() || ch.is_ascii_control() => '_',
            ch => ch,
        })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        encode_segment(filename)
    )
}

/// 根据文件元数据生成弱 ETag。
fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{size}\"")
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("响应头构建失败".into()))
}

/// 解析 Range 头，返回可读取的闭区间。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if file_size == 0 {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
    let Some(range) = value.strip_prefix("bytes=") else {
        return Err(ApiError::BadRequest("invalid Range header".into()));
    };
    if range.contains(',') {
        return Err(ApiError::BadRequest("multiple ranges not supported".into()));
    }

    let invalid = || ApiError::BadRequest("invalid Range header".into());
    let (start_part, end_part) = range.split_once('-').ok_or_else(invalid)?;

    let (start, end) = if start_part.is_empty() {
        let suffix: u64 = end_part.parse().map_err(|_| invalid())?;
        if suffix == 0 {
            return Err(ApiError::RangeNotSatisfiable(file_size));
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_part.parse().map_err(|_| invalid())?;
        let end: u64 = if end_part.is_empty() {
            file_size - 1
        } else {
            end_part.parse::<u64>().map_err(|_| invalid())?.min(file_size - 1)
        };
        (start, end)
    };

    if start > end || start >= file_size {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    Ok(Some((start, end)))
}
