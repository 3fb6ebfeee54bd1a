//! 目录列表 HTML 生成。

use crate::assets::FILES_PLACEHOLDER;
use crate::paths::{build_href, join_relative, parent_relative};
use crate::storage::DirEntry;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// 把已排序过滤的条目渲染进页面模板。
pub fn render_listing(relative: &str, entries: &[DirEntry], template: &str) -> String {
    let mut files_html = String::with_capacity(128 + entries.len() * 96);
    files_html.push_str("<ul>\n");

    if !relative.is_empty() {
        let href = build_href(parent_relative(relative));
        files_html.push_str(&format!("<li><a href=\"{href}\">↩ ../</a></li>\n"));
    }

    for entry in entries {
        let href = build_href(&join_relative(relative, &entry.name));
        if entry.is_dir {
            let display = escape_html(&format!("📁 {}/", entry.name));
            files_html.push_str(&format!("<li><a href=\"{href}\">{display}</a></li>\n"));
        } else {
            let display = escape_html(&entry.name);
            let size = format_file_size(entry.size);
            files_html.push_str(&format!(
                "<li><a href=\"{href}\">{display}</a> <span class=\"size\">{size}</span></li>\n"
            ));
        }
    }

    files_html.push_str("</ul>\n");
    template.replacen(FILES_PLACEHOLDER, &files_html, 1)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// 二进制单位的可读大小：舍入后小于 10 保留两位小数，小于 100 保留一位，
/// 其余取整；舍入到 1024 时进位到下一单位。
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(TB, "TB"), (GB, "GB"), (MB, "MB"), (KB, "KB")];

    let Some(mut index) = UNITS.iter().position(|&(divisor, _)| bytes >= divisor) else {
        return format!("{bytes} B");
    };
    loop {
        let (divisor, unit) = UNITS[index];
        let (value, precision) = round_for_display(bytes as f64 / divisor as f64);
        if value >= 1024.0 && index > 0 {
            index -= 1;
            continue;
        }
        return format!("{value:.precision$} {unit}");
    }
}

fn round_for_display(value: f64) -> (f64, usize) {
    let hundredths = (value * 100.0).round() / 100.0;
    if hundredths < 10.0 {
        return (hundredths, 2);
    }
    let tenths = (value * 10.0).round() / 10.0;
    if tenths < 100.0 {
        return (tenths, 1);
    }
    (value.round(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool, size: u64) -> DirEntry {
        DirEntry {
            name: name.into(),
            is_dir,
            size,
        }
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(1023), "1023 B");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(50 * 1024), "50.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_file_size(123 * 1024 * 1024 * 1024), "123 GB");
        assert_eq!(format_file_size(2 * TB), "2.00 TB");
    }

    #[test]
    fn file_sizes_pick_precision_after_rounding() {
        assert_eq!(format_file_size(10 * KB - 1), "10.0 KB");
        assert_eq!(format_file_size(100 * KB - 1), "100 KB");
        assert_eq!(format_file_size(MB - 1), "1.00 MB");
        assert_eq!(format_file_size(GB - 1), "1.00 GB");
        assert_eq!(format_file_size(2048 * TB), "2048 TB");
    }

    #[test]
    fn escape_covers_markup_characters() {
        let escaped = escape_html(r#"<script>alert("x" & 'y')</script>"#);
        for ch in ['<', '>', '"', '\''] {
            assert!(!escaped.contains(ch), "{ch} left unescaped in {escaped}");
        }
        assert_eq!(
            escaped,
            "&lt;script&gt;alert(&quot;x&quot; &amp; &#39;y&#39;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("&amp;"), "&amp;amp;");
    }

    #[test]
    fn root_listing_has_no_parent_link() {
        let html = render_listing(
            "",
            &[entry("sub", true, 0), entry("a.txt", false, 1536)],
            "<body>{{files}}</body>",
        );
        assert!(!html.contains("../"));
        assert!(html.contains("<a href=\"/sub\">📁 sub/</a>"));
        assert!(html.contains("<a href=\"/a.txt\">a.txt</a> <span class=\"size\">1.50 KB</span>"));
        assert!(!html.contains("{{files}}"));
    }

    #[test]
    fn nested_listing_links_to_parent_and_encodes() {
        let html = render_listing(
            "docs/2024",
            &[entry("<b>&.txt", false, 3)],
            "{{files}}",
        );
        assert!(html.contains("<a href=\"/docs\">↩ ../</a>"));
        assert!(html.contains("href=\"/docs/2024/%3Cb%3E%26.txt\""));
        assert!(html.contains("&lt;b&gt;&amp;.txt"));
    }

    #[test]
    fn listing_preserves_order() {
        let html = render_listing(
            "",
            &[
                entry("sub", true, 0),
                entry("a.txt", false, 1),
                entry("B.txt", false, 1),
            ],
            "{{files}}",
        );
        let sub = html.find("sub/").expect("sub");
        let a = html.find("a.txt").expect("a");
        let b = html.find("B.txt").expect("B");
        assert!(sub < a && a < b);
    }
}
