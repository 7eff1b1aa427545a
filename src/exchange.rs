// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 交换
//!
//! 一次 HTTP 交换 = 请求报文头 + 请求体读取端 + 响应写入端。
//! 分发逻辑只面向这个抽象，因此既可以运行在真实的 TCP 连接上，
//! 也可以运行在内存中的读写器上（用于测试或嵌入）。

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use log::debug;

use crate::{
    exception::Exception,
    headers::Headers,
    param::{CRLF, HTTP_VERSION},
};

/// 请求头部分允许的最大字节数
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// 请求报文中与 I/O 无关的部分
#[derive(Debug, Clone)]
pub struct ExchangeInfo {
    method: String,
    uri: String,
    version: String,
    headers: Headers,
    remote_addr: Option<SocketAddr>,
}

impl ExchangeInfo {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Headers::new(),
            remote_addr: None,
        }
    }

    /// 追加一个请求头，便于链式构造
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.add(key, value);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// 解析请求行，例如 `GET /index.html HTTP/1.1`
    pub fn from_request_line(line: &str) -> Result<Self, Exception> {
        let mut parts = line.split_whitespace();
        let method = parts.next();
        let uri = parts.next();
        let (method, uri) = match (method, uri) {
            (Some(m), Some(u)) => (m, u),
            _ => return Err(Exception::MalformedRequest(line.to_string())),
        };
        let mut info = Self::new(method, strip_authority(uri));
        if let Some(version) = parts.next() {
            info.version = version.to_string();
        }
        Ok(info)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// URI 中 `?` 之前的部分
    pub fn path(&self) -> &str {
        self.uri.split(['?', '#']).next().unwrap_or("")
    }

    /// URI 中 `?` 之后、`#` 之前的部分
    pub fn query(&self) -> Option<&str> {
        self.uri
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or(""))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// 绝对形式的 URI（`http://host/path`）只保留路径部分
fn strip_authority(uri: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = uri.strip_prefix(scheme) {
            return match rest.find('/') {
                Some(i) => &rest[i..],
                None => "/",
            };
        }
    }
    uri
}

/// 读取请求行和请求头，直到空行为止。请求行也计入 [`MAX_HEAD_BYTES`]。
pub fn read_head<R: BufRead>(reader: &mut R) -> Result<ExchangeInfo, Exception> {
    let mut head = reader.by_ref().take(MAX_HEAD_BYTES as u64);
    let too_large = || Exception::MalformedRequest("request head too large".to_string());

    let mut line = String::new();
    head.read_line(&mut line)?;
    if !line.ends_with('\n') && head.limit() == 0 {
        return Err(too_large());
    }
    let mut info = ExchangeInfo::from_request_line(line.trim_end())?;

    loop {
        line.clear();
        let n = head.read_line(&mut line)?;
        if !line.ends_with('\n') && head.limit() == 0 {
            return Err(too_large());
        }
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
        if let Some((key, value)) = line.trim_end().split_once(':') {
            info.headers.add(key.trim(), value.trim());
        }
    }
    Ok(info)
}

/// 一次完整的 HTTP 交换
pub struct Exchange {
    info: ExchangeInfo,
    body: Box<dyn Read + Send>,
    sink: Box<dyn Write + Send>,
    stream: Option<TcpStream>,
    responded: bool,
}

impl Exchange {
    /// 在任意读写器上构造交换，`sink` 接收完整的响应报文
    pub fn new(
        info: ExchangeInfo,
        body: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            info,
            body,
            sink,
            stream: None,
            responded: false,
        }
    }

    /// 从 TCP 连接中读取请求行和请求头，剩下的字节作为请求体。
    ///
    /// `timeout` 同时约束请求头和请求体的每次读取，空闲的连接不会一直占住工作线程。
    pub fn read_from(stream: TcpStream, timeout: Option<Duration>) -> Result<Self, Exception> {
        stream.set_read_timeout(timeout)?;
        let remote = stream.peer_addr().ok();
        let writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream.try_clone()?);

        let mut info = read_head(&mut reader)?;
        info.remote_addr = remote;
        debug!(
            "收到请求：{} {}，来自{:?}",
            info.method(),
            info.uri(),
            info.remote_addr()
        );

        Ok(Self {
            info,
            body: Box::new(reader),
            sink: Box::new(writer),
            stream: Some(stream),
            responded: false,
        })
    }

    pub fn info(&self) -> &ExchangeInfo {
        &self.info
    }

    pub fn body(&mut self) -> &mut (dyn Read + Send) {
        self.body.as_mut()
    }

    /// 写出状态行和响应头，每个交换只能写一次
    pub fn send_head(&mut self, status: u16, reason: &str, headers: &Headers) -> io::Result<()> {
        if self.responded {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "response headers already sent",
            ));
        }
        self.responded = true;
        let status_code: &str = &status.to_string();
        let mut head = [HTTP_VERSION, " ", status_code, " ", reason, CRLF].concat();
        for (key, value) in headers.iter() {
            head.push_str(&[key, ": ", value, CRLF].concat());
        }
        head.push_str(CRLF);
        self.sink.write_all(head.as_bytes())
    }

    pub fn responded(&self) -> bool {
        self.responded
    }

    pub fn body_writer(&mut self) -> &mut (dyn Write + Send) {
        self.sink.as_mut()
    }

    /// 刷新并关闭响应端，错误只记录不上抛
    pub fn close(&mut self) {
        if let Err(e) = self.sink.flush() {
            debug!("关闭交换时刷新失败：{}", e);
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Write);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_request_line() {
        let info = ExchangeInfo::from_request_line("GET /a/b.html?x=1#frag HTTP/1.0").unwrap();
        assert_eq!(info.method(), "GET");
        assert_eq!(info.path(), "/a/b.html");
        assert_eq!(info.query(), Some("x=1"));
        assert_eq!(info.version(), "HTTP/1.0");
        assert!(ExchangeInfo::from_request_line("GET").is_err());
    }

    #[test]
    fn test_absolute_uri() {
        let info = ExchangeInfo::from_request_line("GET http://example.com/x.css HTTP/1.1").unwrap();
        assert_eq!(info.path(), "/x.css");
    }

    #[test]
    fn test_read_head_stops_at_blank_line() {
        let mut reader = Cursor::new(
            b"POST /form HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\na=1".to_vec(),
        );
        let info = read_head(&mut reader).unwrap();
        assert_eq!(info.method(), "POST");
        assert_eq!(info.headers().get("content-length"), Some("3"));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "a=1");
    }

    /// 没有换行的超长请求行和过多的请求头都会被拒绝，而不是无限读取
    #[test]
    fn test_read_head_is_bounded() {
        let long_line = format!("GET /{} HTTP/1.1", "a".repeat(MAX_HEAD_BYTES * 2));
        let result = read_head(&mut Cursor::new(long_line.into_bytes()));
        assert!(matches!(result, Err(Exception::MalformedRequest(_))));

        let mut many = b"GET / HTTP/1.1\r\n".to_vec();
        while many.len() <= MAX_HEAD_BYTES {
            many.extend_from_slice(b"X-Filler: 0123456789abcdef\r\n");
        }
        many.extend_from_slice(b"\r\n");
        let result = read_head(&mut Cursor::new(many));
        assert!(matches!(result, Err(Exception::MalformedRequest(_))));
    }

    #[test]
    fn test_head_written_once() {
        let capture = Capture::default();
        let mut exchange = Exchange::new(
            ExchangeInfo::new("GET", "/"),
            Box::new(Cursor::new(Vec::new())),
            Box::new(capture.clone()),
        );
        let mut headers = Headers::new();
        headers.add("Content-Length", "0");
        exchange.send_head(200, "OK", &headers).unwrap();
        assert!(exchange.send_head(200, "OK", &headers).is_err());
        let text = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }
}
