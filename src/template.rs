// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板处理器
//!
//! [`TemplateHandler`] 同时是内容处理器和 POST 处理器，通常注册在 `.st` 后缀上：
//! 1. 把请求的资源（文件或归档条目）加载为 [`Template`]，模板名是不带后缀的文件名；
//! 2. 通过 [`TemplateRegistry`] 按模板名找到 [`Templatable`] 实例（或使用一个固定实例）；
//! 3. 渲染为字符串，识别 MIME 类型，按协商好的编码压缩，在 `serve_headers` 中给出
//!    `Content-Length`，在 `serve_body` 中交出保存的结果。
//!
//! 模板结果默认不参与缓存，可以通过 [`TemplateHandler::set_cacheable`] 打开。

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lazy_static::lazy_static;
use log::{debug, error};
use regex::{Captures, Regex};
use tempfile::Builder;

use crate::{
    cache::compress_bytes,
    exchange::ExchangeInfo,
    handler::{ContentHandler, PostHandler, PostOutcome},
    request::Request,
    response::HttpResponse,
};

lazy_static! {
    static ref ATTRIBUTE: Regex = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_.]*)\$").unwrap();
    static ref HTML: Regex = Regex::new(r"(?is)<\s*html[\s>]").unwrap();
    static ref XML: Regex = Regex::new(r"(?is)<\?xml\s").unwrap();
}

pub const MIME_HTML: &str = "text/html";
pub const MIME_XML: &str = "text/xml";
pub const MIME_PLAINTEXT: &str = "text/plain";

/// 模板源文本加上渲染时使用的属性
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    attributes: HashMap<String, String>,
}

impl Template {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            attributes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_attribute(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// 把 `$name$` 替换为属性值，未设置的属性替换为空串
    pub fn render(&self) -> String {
        ATTRIBUTE
            .replace_all(&self.source, |caps: &Captures| {
                self.attributes.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }
}

/// 模板的生成逻辑。默认实现直接渲染模板属性，见 [`TemplatableAdapter`]。
///
/// `mime` 是输出参数，留空表示由处理器根据内容识别。
pub trait Templatable: Send + Sync {
    fn render_to_string(
        &self,
        template: &mut Template,
        _request: &Request,
        _mime: &mut String,
    ) -> Option<String> {
        Some(template.render())
    }

    /// 渲染到 `dir`（缺省为系统临时目录）下的一个新文件
    fn render_to_file(
        &self,
        template: &mut Template,
        request: &Request,
        mime: &mut String,
        dir: Option<&Path>,
    ) -> Option<PathBuf> {
        let text = self.render_to_string(template, request, mime)?;
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let written = Builder::new()
            .prefix("TMP")
            .suffix(".tmp.html")
            .tempfile_in(&dir)
            .and_then(|mut f| {
                f.write_all(text.as_bytes())?;
                f.keep().map_err(|e| e.error)
            });
        match written {
            Ok((_, path)) => {
                if mime.is_empty() {
                    mime.push_str(MIME_HTML);
                }
                Some(path)
            }
            Err(e) => {
                error!("无法在{}中创建模板输出文件：{}", dir.display(), e);
                None
            }
        }
    }

    fn render_to_stream(
        &self,
        template: &mut Template,
        request: &Request,
        mime: &mut String,
    ) -> Option<Box<dyn Read + Send>> {
        let text = self.render_to_string(template, request, mime)?;
        Some(Box::new(Cursor::new(text.into_bytes())))
    }

    /// 处理指向模板的 POST 请求，`None` 表示不处理
    fn handle_post(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        _request: &Request,
        _response: &mut HttpResponse,
        _dir: Option<&Path>,
        _template: &mut Template,
    ) -> Option<PostOutcome> {
        None
    }
}

/// 只做属性替换的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplatableAdapter;

impl Templatable for TemplatableAdapter {}

pub type TemplateFactory = Arc<dyn Fn() -> Box<dyn Templatable> + Send + Sync>;

/// 模板名 → 构造函数
#[derive(Default, Clone)]
pub struct TemplateRegistry {
    factories: HashMap<String, TemplateFactory>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Templatable> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// 先精确匹配，再忽略大小写匹配
    pub fn instance(&self, name: &str) -> Option<Box<dyn Templatable>> {
        let factory = self.factories.get(name).or_else(|| {
            self.factories
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, f)| f)
        })?;
        Some(factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

enum Processor {
    Registry(TemplateRegistry),
    Fixed(Arc<dyn Templatable>),
}

/// 基于模板的内容/POST 处理器
pub struct TemplateHandler {
    processor: Processor,
    results: Mutex<HashMap<u64, Bytes>>,
    cacheable: AtomicBool,
}

impl TemplateHandler {
    /// 每个模板按名字从注册表中取得自己的实例
    pub fn with_registry(registry: TemplateRegistry) -> Self {
        Self::build(Processor::Registry(registry))
    }

    /// 所有模板共用一个实例
    pub fn with_processor(processor: Arc<dyn Templatable>) -> Self {
        Self::build(Processor::Fixed(processor))
    }

    fn build(processor: Processor) -> Self {
        Self {
            processor,
            results: Mutex::new(HashMap::new()),
            cacheable: AtomicBool::new(false),
        }
    }

    pub fn set_cacheable(&self, cacheable: bool) {
        self.cacheable.store(cacheable, Ordering::Relaxed);
    }

    pub fn cacheable(&self) -> bool {
        self.cacheable.load(Ordering::Relaxed)
    }

    /// 读取请求资源作为模板，模板名为去掉后缀的文件名
    pub fn load_template(&self, request: &Request) -> Option<Template> {
        let mut source = String::new();
        if let Err(e) = request
            .resource()
            .open()
            .and_then(|mut s| s.read_to_string(&mut source))
        {
            error!("无法加载模板/{}：{}", request.path(), e);
            return None;
        }
        let file_name = request.name();
        let name = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file_name,
        };
        Some(Template::new(&name, &source))
    }

    fn instance(&self, name: &str) -> Option<Arc<dyn Templatable>> {
        match &self.processor {
            Processor::Registry(registry) => registry.instance(name).map(Arc::from),
            Processor::Fixed(processor) => Some(Arc::clone(processor)),
        }
    }

    fn store(&self, id: u64, data: Bytes) {
        match self.results.lock() {
            Ok(mut map) => map.insert(id, data),
            Err(poisoned) => poisoned.into_inner().insert(id, data),
        };
    }

    fn take(&self, id: u64) -> Option<Bytes> {
        match self.results.lock() {
            Ok(mut map) => map.remove(&id),
            Err(poisoned) => poisoned.into_inner().remove(&id),
        }
    }
}

/// 未指定 MIME 时根据内容识别：HTML、XML，否则为纯文本
pub fn detect_mime(text: &str) -> &'static str {
    if HTML.is_match(text) {
        MIME_HTML
    } else if XML.is_match(text) {
        MIME_XML
    } else {
        MIME_PLAINTEXT
    }
}

impl ContentHandler for TemplateHandler {
    fn is_cacheable(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> bool {
        self.cacheable()
    }

    fn provides_body(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> bool {
        true
    }

    fn serve_headers(&self, id: u64, _exchange: &ExchangeInfo, request: &Request) -> Option<HttpResponse> {
        let mut template = self.load_template(request)?;
        let instance = match self.instance(template.name()) {
            Some(i) => i,
            None => {
                error!("[ID{}]模板{}没有对应的实例", id, template.name());
                return None;
            }
        };
        let mut mime = String::new();
        let text = instance.render_to_string(&mut template, request, &mut mime)?;
        if mime.is_empty() {
            mime.push_str(detect_mime(&text));
        }

        let mut response = HttpResponse::new();
        response.set_mime_type(&mime);
        let data = match request.encoding() {
            Some(encoding) => match compress_bytes(text.as_bytes(), Some(encoding)) {
                Ok(compressed) => compressed,
                Err(e) => {
                    error!("[ID{}]压缩模板{}的输出失败：{}", id, template.name(), e);
                    response.set_header("Content-Encoding", "identity");
                    text.into_bytes()
                }
            },
            None => text.into_bytes(),
        };
        response.set_header("Content-Length", &data.len().to_string());
        debug!("[ID{}]模板{}渲染完成，{}字节", id, template.name(), data.len());
        self.store(id, Bytes::from(data));
        Some(response)
    }

    fn serve_body(&self, id: u64, _exchange: &ExchangeInfo, _request: &Request) -> Option<Box<dyn Read + Send>> {
        self.take(id).map(|data| Box::new(Cursor::new(data)) as Box<dyn Read + Send>)
    }

    fn post_serve(&self, id: u64, _exchange: &ExchangeInfo, _request: &Request, _success: bool) {
        // HEAD 请求不会取走结果
        self.take(id);
    }
}

impl PostHandler for TemplateHandler {
    fn handle_post(
        &self,
        id: u64,
        exchange: &ExchangeInfo,
        request: &Request,
        response: &mut HttpResponse,
        scratch_dir: Option<&Path>,
    ) -> PostOutcome {
        let mut template = match self.load_template(request) {
            Some(t) => t,
            None => return PostOutcome::Unhandled,
        };
        let instance = match self.instance(template.name()) {
            Some(i) => i,
            None => return PostOutcome::Unhandled,
        };
        instance
            .handle_post(id, exchange, request, response, scratch_dir, &mut template)
            .unwrap_or(PostOutcome::Unhandled)
    }
}
