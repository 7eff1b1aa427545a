// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::io::{self, Read};
use std::time::SystemTime;

use bytes::Bytes;
use log::debug;

use crate::{
    exchange::{Exchange, ExchangeInfo},
    headers::Headers,
    param::*,
    util::{format_http_date, HtmlBuilder},
};

/// 一个待发送的 HTTP 响应：状态码、响应头和可选的响应体
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status_code: u16,
    information: String,
    headers: Headers,
    body: Option<Bytes>,
    head_only: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status_code: 200,
            information: "OK".to_string(),
            headers: Headers::new(),
            body: None,
            head_only: false,
        }
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = STATUS_CODES.get(&code).copied().unwrap_or("").to_string();
        self
    }

    pub fn add_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.add(key, value);
        self
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.set(key, value);
        self
    }

    pub fn set_mime_type(&mut self, mime: &str) -> &mut Self {
        self.headers.set("Content-Type", mime);
        self
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// HEAD 请求的响应不带响应体
    pub fn set_head_only(&mut self, head_only: bool) -> &mut Self {
        self.head_only = head_only;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// 响应头中声明的 `Content-Length`，缺失或非法时为 -1
    pub fn content_length(&self) -> i64 {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(-1)
    }
}

// 常用的错误与重定向响应
impl HttpResponse {
    /// 浏览器类客户端（`Accept` 含 `text/html`）得到 HTML 说明页，其它客户端只得到响应头；
    /// HEAD 请求一律不带响应体。
    fn from_status_code(info: &ExchangeInfo, code: u16, note: Option<&str>) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        let head_only = HttpRequestMethod::parse(info.method()) == HttpRequestMethod::Head;
        response.set_head_only(head_only);
        if !head_only && info.headers().any_value_contains("Accept", "text/html") {
            let html = HtmlBuilder::from_status_code(code, note).build();
            response.set_mime_type("text/html;charset=utf-8");
            response.set_body(html);
        }
        response
    }

    pub fn not_found(info: &ExchangeInfo) -> Self {
        let note = format!("{} 不存在。", info.path());
        Self::from_status_code(info, 404, Some(&note))
    }

    pub fn access_denied(info: &ExchangeInfo) -> Self {
        Self::from_status_code(info, 403, Some("没有访问该资源的权限。"))
    }

    pub fn internal_error(info: &ExchangeInfo, note: &str) -> Self {
        Self::from_status_code(info, 500, Some(note))
    }

    pub fn service_unavailable(info: &ExchangeInfo, note: &str) -> Self {
        Self::from_status_code(info, 503, Some(note))
    }

    pub fn bad_request(info: &ExchangeInfo, note: &str) -> Self {
        Self::from_status_code(info, 400, Some(note))
    }

    pub fn method_not_allowed(info: &ExchangeInfo) -> Self {
        let mut response = Self::from_status_code(info, 405, None);
        response.set_header("Allow", "GET, HEAD, POST");
        response
    }

    pub fn redirect(location: &str) -> Self {
        let mut response = Self::new();
        response.set_code(301).add_header("Location", location);
        response
    }

    pub fn not_modified() -> Self {
        let mut response = Self::new();
        response.set_code(304).set_head_only(true);
        response
    }
}

// 写出到交换
impl HttpResponse {
    /// 写出状态行与响应头。`length` 为负数时不发送 `Content-Length`。
    pub fn send_headers(&mut self, exchange: &mut Exchange, length: i64) -> io::Result<()> {
        self.headers
            .set("Date", &format_http_date(SystemTime::now()));
        if !self.headers.contains("Server") {
            self.headers.set("Server", SERVER_NAME);
        }
        if !self.headers.contains("Connection") {
            self.headers.set("Connection", "close");
        }
        if length >= 0 {
            self.headers.set("Content-Length", &length.to_string());
        }
        debug!("发送响应头：{} {}", self.status_code, self.information);
        exchange.send_head(self.status_code, &self.information, &self.headers)
    }

    /// 把 `data` 写入响应体，返回写入的字节数
    pub fn send_data(exchange: &mut Exchange, data: &mut dyn Read) -> io::Result<u64> {
        io::copy(data, exchange.body_writer())
    }

    /// 发送完整响应（响应头 + 响应体）
    pub fn send(&mut self, exchange: &mut Exchange) -> io::Result<()> {
        let length = match (self.status_code, &self.body) {
            (304, _) | (204, _) => -1,
            (_, Some(body)) => body.len() as i64,
            (_, None) => 0,
        };
        self.send_headers(exchange, length)?;
        if !self.head_only {
            if let Some(body) = self.body.clone() {
                Self::send_data(exchange, &mut body.as_ref())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_new() {
        let response = HttpResponse::new();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.information(), "OK");
        assert!(response.body().is_none());
        assert_eq!(response.content_length(), -1);
    }

    #[test]
    fn test_response_status_code_setter() {
        let mut response = HttpResponse::new();
        response.set_code(404);
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.information(), "Not Found");
    }

    /// 浏览器得到 HTML 错误页，其它客户端只得到响应头
    #[test]
    fn test_error_body_depends_on_accept() {
        let browser = ExchangeInfo::new("GET", "/x").header("Accept", "text/html,*/*");
        let response = HttpResponse::not_found(&browser);
        assert_eq!(response.status_code(), 404);
        assert!(response.body().is_some());

        let client = ExchangeInfo::new("GET", "/x").header("Accept", "*/*");
        assert!(HttpResponse::not_found(&client).body().is_none());
    }

    #[test]
    fn test_error_body_omitted_for_head() {
        let info = ExchangeInfo::new("HEAD", "/x").header("Accept", "text/html");
        let response = HttpResponse::access_denied(&info);
        assert_eq!(response.status_code(), 403);
        assert!(response.body().is_none());
    }

    #[test]
    fn test_redirect_has_location() {
        let response = HttpResponse::redirect("/docs/");
        assert_eq!(response.status_code(), 301);
        assert_eq!(response.headers().get("location"), Some("/docs/"));
    }

    #[test]
    fn test_content_length_from_header() {
        let mut response = HttpResponse::new();
        response.set_header("Content-Length", "42");
        assert_eq!(response.content_length(), 42);
        response.set_header("Content-Length", "abc");
        assert_eq!(response.content_length(), -1);
    }
}
