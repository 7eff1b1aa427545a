// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求模型
//!
//! 每次 HTTP 交换对应一个 `Request`。它负责：
//! 1. 解析请求方法、规范化后的路径、请求头以及 GET/POST 参数。
//! 2. 把路径解析为一个 [`Resource`]（普通资源或合并资源）。
//! 3. 内容协商：根据 `Accept-Encoding` 和 `User-Agent` 决定是否压缩、用哪种编码，
//!    并管理对应的缓存文件。
//! 4. 客户端缓存校验（`If-Modified-Since` / `If-None-Match`）。
//!
//! # 缓存文件的归属
//! 可缓存资源的编码结果以 `{ETag}.{编码}` 的名字保存在缓存目录中，供后续请求复用，
//! 请求结束时不会删除；不可缓存资源的编码结果是本请求私有的临时文件，请求释放时自动删除。

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lazy_static::lazy_static;
use log::{debug, error, warn};
use regex::Regex;
use tempfile::TempPath;

use crate::{
    cache::compress,
    exception::Exception,
    exchange::{Exchange, ExchangeInfo},
    handler::ContentHandler,
    headers::Headers,
    param::{HttpEncoding, HttpRequestMethod},
    resource::{Backing, Resource, ResourceKind},
    server::ServerContext,
    util::{epoch_seconds, normalize_path, parse_http_date, parse_params, strip_quotes},
};

lazy_static! {
    /// 旧版 Internet Explorer 的 User-Agent，捕获主版本号
    static ref MSIE: Regex = Regex::new(r"Mozilla/.*MSIE ([0-9]\.[0-9])").unwrap();
}

/// 不进行压缩的伪编码名，总是排在候选列表的最后
pub const IDENTITY: &str = "txt";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// 当前请求所绑定的编码文件
#[derive(Debug)]
pub enum CacheFile {
    /// 缓存目录中可被复用的条目，请求结束时保留
    Shared(PathBuf),
    /// 本请求私有的临时文件，释放时删除
    Scratch(TempPath),
}

impl CacheFile {
    pub fn path(&self) -> &Path {
        match self {
            CacheFile::Shared(p) => p,
            CacheFile::Scratch(p) => p,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, CacheFile::Shared(_))
    }
}

/// 表示一次 HTTP 交换中的请求。
pub struct Request {
    ctx: Arc<ServerContext>,
    backing: Backing,
    method: HttpRequestMethod,
    method_name: String,
    uri: String,
    path: String,
    headers: Headers,
    get_params: Headers,
    post_params: Option<Headers>,
    post_data: Option<Bytes>,
    resource: Resource,
    encoding: Option<HttpEncoding>,
    negotiated: bool,
    cache_file: Option<CacheFile>,
}

impl Request {
    /// 从交换中构建请求。
    ///
    /// # 逻辑步骤
    /// 1. 解析方法（无法识别的方法映射为 `Unknown`，不会失败）。
    /// 2. 规范化路径，复制请求头，解析查询串中的 GET 参数。
    /// 3. 路径是合并请求时构造合并资源，否则构造普通资源。
    /// 4. 非 GET/HEAD 请求按 `Content-Length` 读取请求体；表单编码的请求体解析为 POST 参数。
    ///
    /// # 错误
    /// 合并请求的后缀校验失败时返回相应的 [`Exception`]。
    pub fn from_exchange(
        ctx: Arc<ServerContext>,
        backing: &Backing,
        exchange: &mut Exchange,
    ) -> Result<Self, Exception> {
        let info = exchange.info();
        let method = HttpRequestMethod::parse(info.method());
        let path = normalize_path(info.path());
        let headers = info.headers().clone();
        let get_params = info.query().map(parse_params).unwrap_or_default();
        let uri = info.uri().to_string();
        let method_name = info.method().to_string();

        let resource = if ctx.combine_rules().is_combined(&path) {
            let scratch = ctx.cache_dir().map(|c| c.path().to_path_buf());
            backing.resolve_combined(&path, ctx.combine_rules(), scratch)?
        } else {
            backing.resolve(&path)
        };

        let mut post_params = None;
        let mut post_data = None;
        if !method.is_get_or_head() {
            if let Some(data) = read_body(exchange.body(), &headers)? {
                let is_form = headers
                    .get("Content-Type")
                    .map(|t| t.to_lowercase().contains(FORM_CONTENT_TYPE))
                    .unwrap_or(false);
                if is_form {
                    let text = decode_body(&data, headers.get("Content-Type"));
                    post_params = Some(parse_params(&text));
                }
                post_data = Some(data);
            }
        }

        Ok(Self {
            ctx,
            backing: backing.clone(),
            method,
            method_name,
            uri,
            path,
            headers,
            get_params,
            post_params,
            post_data,
            resource,
            encoding: None,
            negotiated: false,
            cache_file: None,
        })
    }

    /// 以当前请求为模板，构造指向另一个资源的请求（目录首页、子资源、POST 转 GET 等）。
    ///
    /// 请求头与参数被复制，编码状态重新开始。
    pub fn derive(&self, backing: &Backing, path: &str) -> Request {
        let path = normalize_path(path);
        Request {
            ctx: Arc::clone(&self.ctx),
            backing: backing.clone(),
            method: self.method,
            method_name: self.method_name.clone(),
            uri: format!("/{}", path),
            resource: backing.resolve(&path),
            path,
            headers: self.headers.clone(),
            get_params: self.get_params.clone(),
            post_params: self.post_params.clone(),
            post_data: self.post_data.clone(),
            encoding: None,
            negotiated: false,
            cache_file: None,
        }
    }

    /// 当前目录下名为 `name` 的子请求
    pub fn child(&self, name: &str) -> Request {
        let dir = self.path.trim_end_matches('/');
        let path = if dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        };
        self.derive(&self.backing, &path)
    }

    /// 同一个请求的 GET 版本，POST 处理器返回文件时使用
    pub fn into_get(mut self) -> Request {
        self.method = HttpRequestMethod::Get;
        self.method_name = HttpRequestMethod::Get.to_string();
        self
    }

    /// 把本地文件包装成请求；文件位于 `home` 之下时使用相对路径，否则以文件所在目录为主目录
    pub fn for_file(&self, home: Option<&Path>, file: &Path) -> Request {
        if let Some(home) = home {
            if let Ok(relative) = file.strip_prefix(home) {
                return self.derive(
                    &Backing::file_system(home),
                    &relative.to_string_lossy(),
                );
            }
            if file.is_relative() {
                return self.derive(&Backing::file_system(home), &file.to_string_lossy());
            }
        }
        let parent = file.parent().unwrap_or_else(|| Path::new("/"));
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.derive(&Backing::file_system(parent), &name)
    }
}

// 访问器
impl Request {
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 规范化后、不带开头 `/` 的路径
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn get_params(&self) -> &Headers {
        &self.get_params
    }

    pub fn post_params(&self) -> Option<&Headers> {
        self.post_params.as_ref()
    }

    pub fn post_data(&self) -> Option<&Bytes> {
        self.post_data.as_ref()
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn encoding(&self) -> Option<HttpEncoding> {
        self.encoding
    }

    pub fn cache_file(&self) -> Option<&CacheFile> {
        self.cache_file.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.resource.exists()
    }

    pub fn is_readable(&self) -> bool {
        self.resource.is_readable()
    }

    pub fn is_directory(&self) -> bool {
        self.resource.is_directory()
    }

    pub fn is_combined(&self) -> bool {
        self.resource.is_combined()
    }

    pub fn is_archive(&self) -> bool {
        self.resource.is_archive()
    }

    pub fn name(&self) -> String {
        self.resource.name()
    }

    pub fn extension(&self) -> String {
        self.resource.extension()
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.resource.modified()
    }

    pub fn caching_enabled(&self) -> bool {
        self.ctx.caching()
    }

    /// 客户端是否允许缓存：`Pragma: no-cache` 或 `Cache-Control: no-cache|private` 时为否
    pub fn is_cacheable(&self) -> bool {
        let pragma = self.headers.any_value_contains("Pragma", "no-cache");
        let control = self.headers.any_value_contains("Cache-Control", "no-cache")
            || self.headers.any_value_contains("Cache-Control", "private");
        !(pragma || control)
    }
}

// ETag 与客户端缓存
impl Request {
    fn etag_cache_key(&self) -> Option<(String, SystemTime, u64)> {
        match self.resource.kind() {
            ResourceKind::File(_) | ResourceKind::Archive(_) => {
                let modified = self.resource.modified()?;
                let len = u64::try_from(self.resource.len()).ok()?;
                Some((self.resource.absolute_path(), modified, len))
            }
            _ => None,
        }
    }

    /// 资源的 ETag。`refresh` 为假时优先使用已知值（本请求的记忆值或进程内的 ETag 缓存）。
    ///
    /// 重新计算后 ETag 发生变化时，旧 ETag 对应的缓存文件被删除。
    pub fn etag(&mut self, refresh: bool) -> Option<String> {
        let previous = self.resource.memoized_etag().map(str::to_string);
        let key = self.etag_cache_key();
        if !refresh {
            if previous.is_some() {
                return previous;
            }
            if let Some((path, modified, len)) = &key {
                let cached = match self.ctx.etag_cache().lock() {
                    Ok(mut cache) => cache.find(path, *modified, *len),
                    Err(poisoned) => poisoned.into_inner().find(path, *modified, *len),
                };
                if cached.is_some() {
                    self.resource.set_etag(cached.clone());
                    return cached;
                }
            }
        }
        let etag = self.resource.etag(true);
        if let (Some(tag), Some((path, modified, len))) = (&etag, &key) {
            match self.ctx.etag_cache().lock() {
                Ok(mut cache) => cache.push(path, tag, *modified, *len),
                Err(poisoned) => poisoned.into_inner().push(path, tag, *modified, *len),
            }
        }
        if let (Some(old), Some(dir)) = (&previous, self.ctx.cache_dir()) {
            if etag.as_ref() != Some(old) {
                dir.invalidate(old);
            }
        }
        etag
    }

    /// 是否可以用 304 响应。
    ///
    /// 需要服务器开启缓存；先检查 `If-Modified-Since`（资源修改时间不晚于该时间即命中），
    /// 再检查 `If-None-Match`（去掉引号后与 ETag 比较，`*` 只匹配存在的资源）。
    pub fn check_client_cache(&mut self) -> bool {
        if !self.ctx.caching() {
            return false;
        }
        let since = self
            .headers
            .get("If-Modified-Since")
            .and_then(parse_http_date);
        if let (Some(since), Some(modified)) = (since, self.resource.modified()) {
            if epoch_seconds(modified) <= epoch_seconds(since) {
                return true;
            }
        }
        let tags: Vec<String> = self
            .headers
            .get_all("If-None-Match")
            .iter()
            .flat_map(|v| v.split(','))
            .map(|t| strip_quotes(t.trim().trim_start_matches("W/")).to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            return false;
        }
        if !self.exists() {
            return false;
        }
        match self.etag(false) {
            Some(etag) => tags.iter().any(|t| *t == etag || t == "*"),
            None => false,
        }
    }
}

// 内容协商与编码缓存
impl Request {
    /// 客户端可接受的编码，按客户端给出的顺序排列，最后总是 [`IDENTITY`]。
    ///
    /// 旧版 IE（低于 6.0，或 6.0 但没有 `EV1` 标记）一律不压缩；Opera 伪装成 IE 时不受影响。
    /// 客户端没有可用的压缩编码时返回空列表。
    pub fn compress_encodings(&self) -> Vec<String> {
        let agent = self.headers.get("User-Agent").unwrap_or("");
        if !agent.to_lowercase().contains("opera") {
            if let Some(caps) = MSIE.captures(agent) {
                let version: f32 = caps[1].parse().unwrap_or(0.0);
                if version < 6.0 || (version == 6.0 && !agent.contains("EV1")) {
                    debug!("旧版IE（{}），不进行压缩", version);
                    return Vec::new();
                }
            }
        }
        let mut encodings: Vec<String> = self
            .headers
            .get_all("Accept-Encoding")
            .iter()
            .flat_map(|v| v.split(','))
            .filter_map(|token| {
                let mut parts = token.split(';');
                let name = parts.next()?.trim().to_lowercase();
                let refused = parts.any(|p| {
                    p.trim()
                        .strip_prefix("q=")
                        .and_then(|q| q.trim().parse::<f32>().ok())
                        .map(|q| q <= 0.0)
                        .unwrap_or(false)
                });
                if name.is_empty() || refused {
                    None
                } else {
                    Some(name)
                }
            })
            .collect();
        if !encodings.iter().any(|e| HttpEncoding::from_token(e).is_some()) {
            return Vec::new();
        }
        encodings.push(IDENTITY.to_string());
        encodings
    }

    /// 决定本请求使用的编码，并准备好对应的编码文件。结果在请求生命周期内只计算一次。
    ///
    /// 依次尝试客户端接受的编码：
    /// - 可缓存时优先使用处理器提供的文件或缓存目录中已有的 `{ETag}.{编码}`；
    /// - 否则把原始内容流式压缩到缓存目录的临时文件中。可缓存时临时文件被重命名为正式缓存文件，
    ///   不可缓存时临时文件只供本次响应使用。
    ///
    /// 某个编码失败时继续尝试下一个；遇到 [`IDENTITY`] 或全部失败时不压缩。
    pub fn negotiate_content(&mut self, id: u64, exchange: &ExchangeInfo, handler: &dyn ContentHandler) {
        if self.negotiated {
            return;
        }
        self.negotiated = true;
        self.encoding = None;
        self.cache_file = None;

        let encodings = self.compress_encodings();
        if encodings.is_empty() {
            return;
        }
        let cache_dir = match self.ctx.cache_dir() {
            Some(dir) => dir.clone(),
            None => return,
        };
        let cacheable = handler.is_cacheable(id, exchange, self);
        let key = if cacheable {
            self.etag(false).unwrap_or_else(|| id.to_string())
        } else {
            id.to_string()
        };

        for name in encodings {
            if name == IDENTITY {
                return;
            }
            let encoding = match HttpEncoding::from_token(&name) {
                Some(e) => e,
                None => continue,
            };
            if cacheable {
                self.encoding = Some(encoding);
                if let Some(file) = handler.cached_file(id, exchange, self) {
                    debug!("[ID{}]使用处理器提供的缓存文件{}", id, file.display());
                    self.cache_file = Some(CacheFile::Shared(file));
                    return;
                }
                let canonical = cache_dir.entry_path(&key, encoding);
                if canonical.is_file() {
                    debug!("[ID{}]复用缓存文件{}", id, canonical.display());
                    self.cache_file = Some(CacheFile::Shared(canonical));
                    return;
                }
                self.encoding = None;
            }

            match self.compress_to_temp(&cache_dir, encoding) {
                Ok(temp) => {
                    self.encoding = Some(encoding);
                    if cacheable {
                        let canonical = cache_dir.entry_path(&key, encoding);
                        match temp.persist(&canonical) {
                            Ok(()) => {
                                debug!("[ID{}]新建缓存文件{}", id, canonical.display());
                                self.cache_file = Some(CacheFile::Shared(canonical));
                            }
                            Err(e) => {
                                warn!("[ID{}]无法保存缓存文件{}：{}", id, canonical.display(), e.error);
                                self.cache_file = Some(CacheFile::Scratch(e.path));
                            }
                        }
                    } else {
                        self.cache_file = Some(CacheFile::Scratch(temp));
                    }
                    return;
                }
                Err(e) => {
                    error!("[ID{}]使用{}压缩{}失败：{}", id, encoding, self.resource.absolute_path(), e);
                }
            }
        }
    }

    /// 只决定本请求使用的编码，不准备编码文件。供自行生成响应体的处理器使用。
    pub fn choose_encoding(&mut self) {
        if self.negotiated {
            return;
        }
        self.negotiated = true;
        self.cache_file = None;
        self.encoding = self
            .compress_encodings()
            .iter()
            .take_while(|name| name.as_str() != IDENTITY)
            .find_map(|name| HttpEncoding::from_token(name));
    }

    /// 压缩到缓存目录下的 `content*.tmp`，失败时临时文件随返回的错误一起被删除
    fn compress_to_temp(&self, cache_dir: &crate::cache::CacheDir, encoding: HttpEncoding) -> io::Result<TempPath> {
        let temp = cache_dir.scratch_file("content")?;
        let mut raw = self.resource.open()?;
        let temp = compress(&mut raw, temp, encoding)?;
        Ok(temp.into_temp_path())
    }

    /// 将要发送的内容长度：有编码文件时为编码文件的长度，否则为原始长度
    pub fn content_length(&self) -> i64 {
        match &self.cache_file {
            Some(file) => fs::metadata(file.path())
                .map(|m| m.len() as i64)
                .unwrap_or(-1),
            None => self.resource.len(),
        }
    }

    /// 打开将要发送的字节流。
    ///
    /// `encoded` 为真且绑定了编码文件时返回编码文件；编码文件无法读取时退回原始内容，
    /// 同时撤销编码并在请求头中标记 `Pragma: no-cache`，避免客户端缓存这次的结果。
    pub fn stream(&mut self, encoded: bool) -> Option<Box<dyn Read + Send>> {
        if encoded {
            if let Some(file) = &self.cache_file {
                match File::open(file.path()) {
                    Ok(f) => return Some(Box::new(f)),
                    Err(e) => {
                        error!("无法读取编码文件{}：{}，改为发送原始内容", file.path().display(), e);
                        self.headers.set("Pragma", "no-cache");
                        self.encoding = None;
                        self.cache_file = None;
                    }
                }
            }
        }
        match self.resource.open() {
            Ok(s) => Some(s),
            Err(e) => {
                error!("无法读取{}：{}", self.resource.absolute_path(), e);
                None
            }
        }
    }
}

/// 按 `Content-Length` 读取请求体；长度缺失、非法或不大于 0 时没有请求体
fn read_body(body: &mut (dyn Read + Send), headers: &Headers) -> Result<Option<Bytes>, Exception> {
    let length = match headers
        .get("Content-Length")
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        Some(n) if n > 0 => n as u64,
        _ => return Ok(None),
    };
    let mut data = Vec::with_capacity(length.min(1 << 20) as usize);
    body.take(length).read_to_end(&mut data)?;
    Ok(Some(Bytes::from(data)))
}

/// 尽力把请求体解码为字符串：先试 ASCII，再试 UTF-8 与 `Content-Type` 声明的字符集，
/// 最后退回有损的 UTF-8 转换
fn decode_body(data: &[u8], content_type: Option<&str>) -> String {
    if data.is_ascii() {
        return data.iter().map(|&b| b as char).collect();
    }
    if let Ok(text) = std::str::from_utf8(data) {
        return text.to_string();
    }
    let declared = content_type
        .and_then(|t| t.to_lowercase().split("charset=").nth(1).map(|c| c.trim().to_string()))
        .unwrap_or_default();
    if declared.starts_with("iso-8859-1") || declared.starts_with("latin1") {
        return data.iter().map(|&b| b as char).collect();
    }
    String::from_utf8_lossy(data).into_owned()
}
