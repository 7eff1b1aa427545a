// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use percent_encoding::percent_decode_str;

use crate::{headers::Headers, param::STATUS_CODES, resource::DirEntry};

/// RFC 1123，也是响应中使用的格式
const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => STATUS_CODES.get(&code).copied().unwrap_or(""),
        };
        let body = format!(
            r"
            <h1>{} {}</h1>
            <p>{}</p>
            ",
            code,
            STATUS_CODES.get(&code).copied().unwrap_or(""),
            description
        );
        Self { title, css, body }
    }

    /// 目录列表：先列出子目录，再列出文件
    pub fn from_listing(path: &str, dirs: &[DirEntry], files: &[DirEntry]) -> Self {
        let shown = path.trim_end_matches('/');
        let mut body = String::new();
        body.push_str(&format!("<h1>/{}的文件列表</h1><hr>", escape_html(shown)));
        body.push_str("<table>");
        body.push_str(
            r#"
            <tr>
                <td>文件名</td>
                <td>大小</td>
                <td>修改时间</td>
            </tr>
            <tr>
                <td><a href="../">..</a></td>
                <td></td>
                <td></td>
            </tr>
            "#,
        );
        for entry in dirs {
            let name = [escape_html(entry.name()).as_str(), "/"].concat();
            body.push_str(&format!(
                r#"
                <tr>
                    <td><a href="{}">{}</a></td>
                    <td>文件夹</td>
                    <td>{}</td>
                </tr>
                "#,
                &name,
                &name,
                format_local_time(entry.modified())
            ));
        }
        for entry in files {
            let name = escape_html(entry.name());
            body.push_str(&format!(
                r#"
                <tr>
                    <td><a href="{}">{}</a></td>
                    <td>{}</td>
                    <td>{}</td>
                </tr>
                "#,
                &name,
                &name,
                format_file_size(entry.size()),
                format_local_time(entry.modified())
            ));
        }
        body.push_str("</table>");
        let css = r"
            table {
                border-collapse: collapse;
                width: 100%;
            }

            td {
                padding: 8px;
                white-space: pre-wrap;
                border: none;
            }"
        .to_string();
        HtmlBuilder {
            title: format!("/{}的文件列表", escape_html(shown)),
            css,
            body,
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}

fn format_local_time(time: SystemTime) -> String {
    let local_time: DateTime<Local> = time.into();
    local_time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// 按 RFC 1123 格式化 HTTP 日期，例如 `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn format_http_date(time: SystemTime) -> String {
    let date: DateTime<Utc> = time.into();
    date.format(RFC1123).to_string()
}

/// 解析 HTTP 日期，依次尝试 RFC 1123、RFC 850 与 asctime 三种格式。
///
/// 旧版 IE 会在 `If-Modified-Since` 后面附加 `; length=...`，分号之后的内容被忽略。
pub fn parse_http_date(text: &str) -> Option<SystemTime> {
    let text = text.split(';').next().unwrap_or("").trim();
    [RFC1123, RFC850, ASCTIME]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| {
            let secs = naive.and_utc().timestamp();
            u64::try_from(secs)
                .ok()
                .map(|s| UNIX_EPOCH + Duration::from_secs(s))
        })
}

/// 把时间截断到秒，HTTP 日期没有更细的精度
pub fn epoch_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// URL 解码单个组件，`+` 视为空格
pub fn url_decode(text: &str) -> String {
    percent_decode_str(&text.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// 规范化请求路径：百分号解码、消除 `.` 与 `..`、去掉开头的 `/`。
///
/// `..` 不会越过根目录；原路径以 `/` 结尾时结果也保留结尾的 `/`。
pub fn normalize_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut path = segments.join("/");
    if !path.is_empty() && decoded.ends_with('/') {
        path.push('/');
    }
    path
}

/// 消除已解码的相对路径中的 `.` 与 `..`，不再做百分号解码。
///
/// `..` 越过根目录时返回 `None`。
pub fn resolve_relative(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

/// 去掉值两端的单个引号（单引号或双引号）
pub fn strip_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix('"')
        .or_else(|| value.strip_prefix('\''))
        .unwrap_or(value);
    value
        .strip_suffix('"')
        .or_else(|| value.strip_suffix('\''))
        .unwrap_or(value)
}

/// 解析 `a=1&b=2` 形式的参数串。
///
/// 键经过 URL 解码并转换为小写；值经过 URL 解码、去掉首尾空白和一层引号。
pub fn parse_params(text: &str) -> Headers {
    let mut params = Headers::new();
    for pair in text.split('&') {
        if pair.trim().is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = url_decode(key).trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        let value = url_decode(value);
        params.add(&key, strip_quotes(value.trim()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_size() {
        assert_eq!(format_file_size(9926), "9.7 KB".to_string());
        assert_eq!(format_file_size(0), "0.0 B");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_html_builder_from_status_code() {
        let html = HtmlBuilder::from_status_code(404, Some("找不到")).build();
        assert!(html.contains("404 Not Found"));
        assert!(html.contains("找不到"));
        assert!(html.contains("<!DOCTYPE html>"));
    }

    /// 未登记的状态码不会导致 panic
    #[test]
    fn test_html_builder_unknown_code() {
        let html = HtmlBuilder::from_status_code(599, None).build();
        assert!(html.contains("599"));
    }

    #[test]
    fn test_http_date_round_trip() {
        let time = UNIX_EPOCH + Duration::from_secs(784111777);
        let text = format_http_date(time);
        assert_eq!(text, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&text), Some(time));
    }

    /// RFC 850 与 asctime 两种旧格式都能被识别
    #[test]
    fn test_http_date_legacy_formats() {
        let expected = Some(UNIX_EPOCH + Duration::from_secs(784111777));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), expected);
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), expected);
        assert_eq!(
            parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT; length=1024"),
            expected
        );
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("/docs/"), "docs/");
        assert_eq!(normalize_path("/a/./b/../c.txt"), "a/c.txt");
        assert_eq!(normalize_path("/../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_path("/with%20space.html"), "with space.html");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_relative("css/./a.css").as_deref(), Some("css/a.css"));
        assert_eq!(resolve_relative("css/../b.css").as_deref(), Some("b.css"));
        assert_eq!(resolve_relative("../private/secret.css"), None);
        assert_eq!(resolve_relative("css/../../x.css"), None);
        // 已经解码过的路径不会再被解码
        assert_eq!(resolve_relative("a%2e%2e/b.css").as_deref(), Some("a%2e%2e/b.css"));
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params("Name=%22John+Smith%22&tag=a&TAG=b&empty&=skip");
        assert_eq!(params.get("name"), Some("John Smith"));
        assert_eq!(params.get_all("tag"), &["a", "b"]);
        assert_eq!(params.get("empty"), Some(""));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("abc"), "abc");
        assert_eq!(strip_quotes("\"\"x\"\""), "\"x\"");
    }
}
