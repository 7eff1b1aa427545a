// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#![allow(dead_code)]

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use httpdbase::{Config, Exchange, ExchangeInfo, Httpd, RequestHandler};

/// 收集响应报文的写入端
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 解析后的响应
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub fn parse_response(raw: &[u8]) -> Reply {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("响应中没有头部结束标记");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Reply {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    }
}

/// 在内存中执行一次交换
pub fn exchange(handler: &RequestHandler, info: ExchangeInfo, body: &[u8]) -> Reply {
    let capture = Capture::default();
    let exchange = Exchange::new(
        info,
        Box::new(Cursor::new(body.to_vec())),
        Box::new(capture.clone()),
    );
    handler.handle(exchange);
    let raw = capture.0.lock().unwrap().clone();
    parse_response(&raw)
}

pub fn get(handler: &RequestHandler, uri: &str) -> Reply {
    exchange(handler, ExchangeInfo::new("GET", uri), b"")
}

/// 缓存目录放在站点目录之外，避免出现在目录列表里
pub fn httpd(site: &Path, cache: &Path) -> Httpd {
    Httpd::new(Config::new().with_home(site).with_cache_dir(cache))
}

/// 一个小站点：首页、样式表、脚本和一个没有首页的目录
pub fn build_site(root: &Path) {
    fs::create_dir_all(root.join("css")).unwrap();
    fs::create_dir_all(root.join("js")).unwrap();
    fs::create_dir_all(root.join("docs/manual")).unwrap();
    fs::create_dir_all(root.join("legacy")).unwrap();
    fs::write(root.join("index.html"), "<html><body>home</body></html>").unwrap();
    fs::write(root.join("css/a.css"), "a{color:red}").unwrap();
    fs::write(root.join("css/b.css"), "b{color:blue}").unwrap();
    fs::write(root.join("js/app.js"), "console.log('app');").unwrap();
    fs::write(root.join("docs/readme.txt"), "read me").unwrap();
    fs::write(root.join("docs/manual/intro.txt"), "intro").unwrap();
    fs::write(root.join("legacy/index.htm"), "<html>legacy</html>").unwrap();
    fs::write(root.join("big.txt"), "lorem ipsum dolor sit amet ".repeat(400)).unwrap();
}
