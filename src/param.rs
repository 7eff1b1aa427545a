// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块集中定义了服务器在协议层面使用的常量和强类型枚举：
//! - HTTP 状态码及其原因短语（Reason Phrase）。
//! - 后缀名到 MIME 类型的映射表（一个后缀可以对应多个候选类型）。
//! - HTTP 方法与内容编码的枚举。

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "httpdbase";

/// 状态行中使用的协议版本
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 找不到匹配的 MIME 类型时使用的兜底类型
pub const DEFAULT_MIME: &str = "text/plain";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");

        // 3xx: 重定向
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");

        // 4xx: 客户端错误
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(411, "Length Required");
        map.insert(413, "Content Too Large");
        map.insert(415, "Unsupported Media Type");

        // 5xx: 服务端错误
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(503, "Service Unavailable");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

lazy_static! {
    /// 文件后缀名（小写、不含点）到候选 MIME 类型的映射表。
    ///
    /// 第一个元素是首选类型。当同一后缀存在多个合理类型时，
    /// 由客户端的 `Accept` 头决定最终使用哪一个，见 [`negotiate_mime`]。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static [&'static str]> = {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("aac", &["audio/aac"]);
        map.insert("avi", &["video/x-msvideo"]);
        map.insert("avif", &["image/avif"]);
        map.insert("bin", &["application/octet-stream"]);
        map.insert("bmp", &["image/bmp"]);
        map.insert("bz2", &["application/x-bzip2"]);
        map.insert("css", &["text/css"]);
        map.insert("csv", &["text/csv"]);
        map.insert("doc", &["application/msword"]);
        map.insert("eot", &["application/vnd.ms-fontobject"]);
        map.insert("epub", &["application/epub+zip"]);
        map.insert("gif", &["image/gif"]);
        map.insert("gz", &["application/gzip", "application/x-gzip"]);
        map.insert("htm", &["text/html"]);
        map.insert("html", &["text/html"]);
        map.insert("ico", &["image/x-icon", "image/vnd.microsoft.icon"]);
        map.insert("ics", &["text/calendar"]);
        map.insert("jar", &["application/java-archive"]);
        map.insert(
            "js",
            &["text/javascript", "application/javascript", "application/x-javascript"],
        );
        map.insert("json", &["application/json"]);
        map.insert("jpg", &["image/jpeg"]);
        map.insert("jpeg", &["image/jpeg"]);
        map.insert("mjs", &["text/javascript"]);
        map.insert("mp3", &["audio/mpeg"]);
        map.insert("mp4", &["video/mp4"]);
        map.insert("mpeg", &["video/mpeg"]);
        map.insert("oga", &["audio/ogg"]);
        map.insert("ogv", &["video/ogg"]);
        map.insert("otf", &["font/otf"]);
        map.insert("pdf", &["application/pdf"]);
        map.insert("png", &["image/png"]);
        map.insert("rtf", &["application/rtf", "text/rtf"]);
        map.insert("sh", &["application/x-sh"]);
        map.insert("svg", &["image/svg+xml"]);
        map.insert("tar", &["application/x-tar"]);
        map.insert("tgz", &["application/gzip"]);
        map.insert("tif", &["image/tiff"]);
        map.insert("tiff", &["image/tiff"]);
        map.insert("txt", &["text/plain"]);
        map.insert("ttf", &["font/ttf"]);
        map.insert("wav", &["audio/wav", "audio/x-wav"]);
        map.insert("wasm", &["application/wasm"]);
        map.insert("webm", &["video/webm"]);
        map.insert("webp", &["image/webp"]);
        map.insert("woff", &["font/woff"]);
        map.insert("woff2", &["font/woff2"]);
        map.insert("xhtml", &["application/xhtml+xml", "text/html"]);
        map.insert("xml", &["text/xml", "application/xml"]);
        map.insert("xsl", &["application/xslt+xml", "text/xml"]);
        map.insert("zip", &["application/zip"]);
        map.insert("7z", &["application/x-7z-compressed"]);
        map
    };
}

/// 根据后缀名和客户端 `Accept` 头挑选 `Content-Type`。
///
/// # 逻辑
/// 1. 后缀名未登记时返回 [`DEFAULT_MIME`]。
/// 2. 依次检查每个候选类型，第一个出现在 `Accept` 中的候选胜出。
/// 3. `Accept` 缺失或没有任何候选被显式接受（例如只有 `*/*`）时使用首选类型。
pub fn negotiate_mime(extension: &str, accept: &[String]) -> String {
    let candidates = match MIME_TYPES.get(extension.trim_start_matches('.').to_lowercase().as_str()) {
        Some(c) => *c,
        None => return DEFAULT_MIME.to_string(),
    };
    for candidate in candidates {
        if accept
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case(candidate))
        {
            return candidate.to_string();
        }
    }
    candidates[0].to_string()
}

/// 标准 HTTP 请求方法。
///
/// 解析永远不会失败：无法识别的方法统一映射为 [`HttpRequestMethod::Unknown`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Unknown,
}

impl HttpRequestMethod {
    pub fn parse(method: &str) -> Self {
        match method.trim().to_uppercase().as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "DELETE" => HttpRequestMethod::Delete,
            _ => HttpRequestMethod::Unknown,
        }
    }

    /// GET 与 HEAD 共享“读取资源”的处理分支
    pub fn is_get_or_head(&self) -> bool {
        matches!(self, HttpRequestMethod::Get | HttpRequestMethod::Head)
    }
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib/deflate 压缩
    Deflate,
}

impl HttpEncoding {
    /// 把 `Accept-Encoding` 中的单个令牌解析为编码；不认识的令牌返回 `None`。
    pub fn from_token(token: &str) -> Option<Self> {
        match token.split(';').next().unwrap_or("").trim().to_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(HttpEncoding::Gzip),
            "deflate" => Some(HttpEncoding::Deflate),
            _ => None,
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Post => write!(f, "POST"),
            HttpRequestMethod::Put => write!(f, "PUT"),
            HttpRequestMethod::Delete => write!(f, "DELETE"),
            HttpRequestMethod::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符，也用作缓存文件的后缀
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
        }
    }
}
