// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 处理器接口
//!
//! 服务器的扩展点分为两类：
//! - [`ContentHandler`]：按后缀名注册，控制 GET/HEAD 请求的缓存判定、响应头与响应体、
//!   文件不存在时的替代以及目录列表。
//! - [`PostHandler`]：按 URL 或后缀名注册，处理 POST 请求体。
//!
//! 所有钩子都有默认实现，实现者只需覆盖关心的部分。每次调用都带有本次交换的序号 `id`，
//! 同一个交换中的多次钩子调用可以据此关联起来。

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::{
    exchange::ExchangeInfo,
    request::Request,
    resource::SortBy,
    response::HttpResponse,
    util::HtmlBuilder,
};

/// GET/HEAD 处理流程中的钩子集合
pub trait ContentHandler: Send + Sync {
    /// 资源是否参与 ETag/Last-Modified 校验以及编码缓存
    fn is_cacheable(&self, _id: u64, _exchange: &ExchangeInfo, request: &Request) -> bool {
        request.caching_enabled() && request.is_cacheable()
    }

    /// 返回一个已经按 `request.encoding()` 编码好的外部文件，跳过压缩
    fn cached_file(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> Option<PathBuf> {
        None
    }

    /// 返回 `false` 时请求以 404 结束
    fn pre_serve(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> bool {
        true
    }

    /// 返回一个替代响应，它的响应头（以及响应体规则）将代替默认值。
    ///
    /// 如果随后 [`ContentHandler::serve_body`] 提供了响应体，这里必须设置正确的 `Content-Length`。
    fn serve_headers(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> Option<HttpResponse> {
        None
    }

    /// 响应体总是由 [`ContentHandler::serve_body`] 提供时返回 `true`。
    ///
    /// 此时服务器只选定编码，不再压缩或打开资源本身，编码由处理器自行完成。
    fn provides_body(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> bool {
        false
    }

    /// 返回替代的响应体字节流
    fn serve_body(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        _request: &Request,
    ) -> Option<Box<dyn Read + Send>> {
        None
    }

    /// 无论成功与否，请求结束时都会被调用
    fn post_serve(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request, _success: bool) {}

    /// 资源不存在时给出一个替代请求
    fn on_file_not_found(&self, _id: u64, _exchange: &ExchangeInfo, _request: &Request) -> Option<Request> {
        None
    }

    /// 目录列表的 HTML，`None` 表示拒绝访问
    fn list_directory(&self, request: &Request) -> Option<String> {
        default_listing(request)
    }
}

/// POST 处理器的返回值
#[derive(Debug)]
pub enum PostOutcome {
    /// 直接发送的最终响应
    Response(HttpResponse),
    /// 把这个文件当作 GET 请求继续处理
    File(PathBuf),
    /// 未处理，请求以 503 结束
    Unhandled,
    /// 处理器无法给出合法结果，请求以 500 结束
    Invalid(String),
}

pub trait PostHandler: Send + Sync {
    /// `scratch_dir` 是一个可写的本地目录，可用于生成返回的文件
    fn handle_post(
        &self,
        id: u64,
        exchange: &ExchangeInfo,
        request: &Request,
        response: &mut HttpResponse,
        scratch_dir: Option<&Path>,
    ) -> PostOutcome;
}

/// 未注册任何处理器时使用的默认处理器
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl ContentHandler for DefaultHandler {}

impl PostHandler for DefaultHandler {
    fn handle_post(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        _request: &Request,
        _response: &mut HttpResponse,
        _scratch_dir: Option<&Path>,
    ) -> PostOutcome {
        PostOutcome::Unhandled
    }
}

/// 先列子目录再列文件，各自按名字排序
pub fn default_listing(request: &Request) -> Option<String> {
    let resource = request.resource();
    let dirs = resource.list_directories(SortBy::Name)?;
    let files = resource.list_files(SortBy::Name)?;
    Some(HtmlBuilder::from_listing(request.path(), &dirs, &files).build())
}
