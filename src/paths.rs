//! 请求路径的纯字符串处理，不访问文件系统。
//!
//! 是否位于根目录内由 [`crate::storage::Storage::resolve`] 在规范化之后检查。

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// URL 路径段与 `filename*` 参数的编码集，只保留 RFC 3986 非保留字符。
pub const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 百分号解码请求路径；非法 UTF-8 被替换而不是拒绝，仍可做穿越检查。
pub fn decode_request_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// 把解码后的请求路径规范化为相对路径。
///
/// 反斜杠转为斜杠，去掉空段和 `.`，`..` 与前一段抵消，去掉开头的根或盘符，
/// 因此 `/etc/passwd` 变为 `etc/passwd`，根目录为空字符串。
///
/// 无可抵消的开头 `..` 会被保留，调用方仍需对原始输入调用
/// [`contains_parent_traversal`]。
pub fn normalize_relative_path(raw: &str) -> String {
    let sanitized = raw.replace('\\', "/");
    let rest = strip_drive_prefix(&sanitized);
    let absolute = rest.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => continue,
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// 任一路径段（两种分隔符）恰为 `..` 时返回 true。
pub fn contains_parent_traversal(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "..")
}

/// 生成逐段编码的绝对链接。
pub fn build_href(relative: &str) -> String {
    let encoded = relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>();
    if encoded.is_empty() {
        return "/".to_string();
    }
    format!("/{}", encoded.join("/"))
}

pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT_ENCODE_SET).to_string()
}

/// 相对路径的父目录，顶层条目返回 `""`。
pub fn parent_relative(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(index) => &relative[..index],
        None => "",
    }
}

pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn strip_drive_prefix(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
    {
        return &path[2..];
    }
    path
}
