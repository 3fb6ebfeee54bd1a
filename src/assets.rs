//! 嵌入式页面模板。

use rust_embed::RustEmbed;
use std::borrow::Cow;

pub const FILES_PLACEHOLDER: &str = "{{files}}";

const FALLBACK_TEMPLATE: &str =
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Accio</title></head><body>{{files}}</body></html>";

#[derive(RustEmbed)]
#[folder = "assets"]
/// 嵌入式 HTML 资源。
pub struct Assets;

/// 返回目录列表页面模板。
pub fn index_template() -> Cow<'static, str> {
    match Assets::get("index.html") {
        Some(file) => match file.data {
            Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes),
            Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
        },
        None => Cow::Borrowed(FALLBACK_TEMPLATE),
    }
}
