//! multipart 上传处理器与上传目录管理。

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::config::{MAX_NAME_ATTEMPTS, UPLOADS_SUBDIR};
use crate::error::{ApiError, StartupError};
use crate::paths::{contains_parent_traversal, normalize_relative_path};
use crate::platform;

#[derive(Debug)]
pub struct UploadConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub max_total_size: u64,
}

enum PartError {
    Payload(MultipartError),
    Io(io::Error),
}

/// 接收 multipart 上传，每个文件部分写入独立的新文件。
///
/// 请求失败时删除本次请求已写入的全部文件，调用方只会看到完整成功或没有写入。
pub async fn upload_files(
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    if !upload.enabled {
        return Err(ApiError::Forbidden("Uploads are disabled".into()));
    }
    let mut multipart = multipart.map_err(|err| {
        debug!(error = %err, "rejected upload body");
        invalid_payload()
    })?;

    let mut written = Vec::new();
    if let Err(err) = receive_parts(&upload.dir, &mut multipart, &mut written).await {
        discard_uploads(&written).await;
        return Err(err);
    }
    if written.is_empty() {
        return Err(ApiError::BadRequest("No files provided".into()));
    }

    let mut body = String::from("Uploaded files:\n");
    for path in &written {
        body.push_str(&file_name_of(path));
        body.push('\n');
    }
    Ok((StatusCode::OK, body).into_response())
}

/// 逐个保存文件部分；新建的目标路径先记入 `written` 再写入内容。
async fn receive_parts(
    dir: &Path,
    multipart: &mut Multipart,
    written: &mut Vec<PathBuf>,
) -> Result<(), ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(|err| {
        debug!(error = %err, "malformed multipart payload");
        invalid_payload()
    })? {
        let Some(raw_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
        else {
            continue;
        };
        let Some(name) = sanitize_upload_filename(&raw_name) else {
            warn!(name = raw_name, "rejected upload file name");
            return Err(ApiError::BadRequest("Invalid file name".into()));
        };

        let (destination, mut file) = create_unique_destination(dir, &name)
            .await
            .map_err(|err| {
                error!(name, error = %err, "failed to create upload destination");
                ApiError::Internal("Failed to save file".into())
            })?;
        written.push(destination.clone());

        match write_part(&mut field, &mut file).await {
            Ok(bytes) => {
                info!(name = file_name_of(&destination), bytes, "upload saved");
            }
            Err(PartError::Payload(err)) => {
                debug!(error = %err, "upload interrupted");
                return Err(invalid_payload());
            }
            Err(PartError::Io(err)) => {
                error!(path = ?destination, error = %err, "failed to write upload");
                return Err(ApiError::Internal("Failed to save file".into()));
            }
        }
    }
    Ok(())
}

async fn discard_uploads(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path).await {
            warn!(path = ?path, error = %err, "failed to remove rejected upload");
        } else {
            debug!(path = ?path, "removed rejected upload");
        }
    }
}

async fn write_part(field: &mut Field<'_>, file: &mut File) -> Result<u64, PartError> {
    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(PartError::Payload)? {
        file.write_all(&chunk).await.map_err(PartError::Io)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(PartError::Io)?;
    Ok(written)
}

fn invalid_payload() -> ApiError {
    ApiError::BadRequest("Invalid multipart payload".into())
}

/// 把客户端文件名收敛为单个安全路径段；为空、含 `..` 段或末段为 `.`/`..`
/// 时返回 `None`。
pub fn sanitize_upload_filename(raw: &str) -> Option<String> {
    let normalized = normalize_relative_path(raw);
    if normalized.is_empty() || contains_parent_traversal(&normalized) {
        return None;
    }
    let last = normalized.rsplit('/').next().unwrap_or_default();
    let sanitized = last.replace(['/', '\\'], "_");
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return None;
    }
    Some(sanitized)
}

/// 用 `create_new` 原子占用 `<dir>/<name>`，已存在时依次尝试
/// `<stem>_<n><.ext>`，从不打开已有文件写入。
pub async fn create_unique_destination(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            dir.join(name)
        } else {
            dir.join(suffixed_name(name, attempt))
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {name} after {MAX_NAME_ATTEMPTS} attempts"),
    ))
}

fn suffixed_name(name: &str, n: u32) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 选定上传目录：显式参数或系统下载目录下的 `accio`，失败时回退到
/// `<base>/accio`。
pub async fn prepare_uploads_dir(
    requested: Option<&Path>,
    base: &Path,
) -> Result<PathBuf, StartupError> {
    let primary = match requested {
        Some(path) => path.to_path_buf(),
        None => match platform::default_downloads_dir() {
            Some(downloads) => downloads.join(UPLOADS_SUBDIR),
            None => base.join(UPLOADS_SUBDIR),
        },
    };
    let primary_reason = match ensure_dir(&primary).await {
        Ok(dir) => return Ok(dir),
        Err(reason) => reason,
    };
    warn!(path = ?primary, reason = %primary_reason, "uploads directory unusable, trying fallback");

    let fallback = base.join(UPLOADS_SUBDIR);
    ensure_dir(&fallback)
        .await
        .map_err(|fallback_reason| StartupError::UploadsDir {
            primary,
            primary_reason,
            fallback,
            fallback_reason,
        })
}

async fn ensure_dir(candidate: &Path) -> Result<PathBuf, String> {
    if candidate.as_os_str().is_empty() {
        return Err("empty path".into());
    }
    let absolute = if candidate.is_relative() {
        std::env::current_dir()
            .map_err(|err| err.to_string())?
            .join(candidate)
    } else {
        candidate.to_path_buf()
    };
    if let Err(err) = fs::create_dir_all(&absolute).await {
        if fs::metadata(&absolute).await.is_err() {
            return Err(err.to_string());
        }
    }
    let metadata = fs::metadata(&absolute)
        .await
        .map_err(|err| err.to_string())?;
    if !metadata.is_dir() {
        return Err("path exists and is not a directory".into());
    }
    fs::canonicalize(&absolute)
        .await
        .map_err(|err| err.to_string())
}
