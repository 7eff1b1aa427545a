// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发
//!
//! 每个 HTTP 交换依次经过以下阶段：
//! 1. 构建 [`Request`]，分配交换序号。
//! 2. 目录请求：寻找默认首页；找不到时按目录浏览规则处理（补全结尾的 `/` 或返回 403）。
//! 3. POST 请求：交给 POST 处理器，它可以直接给出响应，也可以返回一个文件转为 GET 处理。
//! 4. GET/HEAD 请求：客户端缓存校验（304）、`pre_serve` 钩子、资源存在性检查
//!    （归档模式下回退到备用目录，随后是 `on_file_not_found` 钩子）、可读性检查。
//! 5. 发送：内容协商，组装响应头，发送响应体，最后调用 `post_serve` 钩子。
//!
//! 无论哪个阶段出错，交换最终都会被关闭。

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::{
    exception::Exception,
    exchange::{Exchange, ExchangeInfo},
    handler::{ContentHandler, PostOutcome},
    param::{negotiate_mime, HttpRequestMethod},
    request::Request,
    resource::Backing,
    response::HttpResponse,
    server::ServerContext,
    util::format_http_date,
};

/// 把 HTTP 交换分发给资源与处理器。可以在任意线程上并发使用。
pub struct RequestHandler {
    ctx: Arc<ServerContext>,
    backing: Backing,
    scratch_dir: Option<PathBuf>,
}

impl RequestHandler {
    /// `scratch_dir` 是交给 POST 处理器的可写目录
    pub fn new(ctx: Arc<ServerContext>, backing: Backing, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            ctx,
            backing,
            scratch_dir,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// 处理一次交换并关闭它
    pub fn handle(&self, mut exchange: Exchange) {
        let id = self.ctx.next_id();
        let info = exchange.info().clone();
        if self.ctx.verbose() {
            info!(
                "[ID{}]{} {}，来自{:?}",
                id,
                info.method(),
                info.uri(),
                info.remote_addr()
            );
        }

        let result = match Request::from_exchange(Arc::clone(&self.ctx), &self.backing, &mut exchange) {
            Ok(request) => self.process(id, &mut exchange, &info, request),
            Err(Exception::PathOutsideRoot(path)) => {
                warn!("[ID{}]请求{}越过了根目录：{}", id, info.uri(), path);
                HttpResponse::not_found(&info).send(&mut exchange)
            }
            Err(e) => {
                error!("[ID{}]无法构建请求{}：{}", id, info.uri(), e);
                HttpResponse::bad_request(&info, &e.to_string()).send(&mut exchange)
            }
        };

        if let Err(e) = result {
            error!("[ID{}]处理请求{}时出错：{}", id, info.uri(), e);
            if !exchange.responded() {
                let _ = HttpResponse::internal_error(&info, "处理请求时出错。").send(&mut exchange);
            }
        }
        exchange.close();
        debug!("[ID{}]交换已关闭", id);
    }

    fn process(
        &self,
        id: u64,
        exchange: &mut Exchange,
        info: &ExchangeInfo,
        mut request: Request,
    ) -> io::Result<()> {
        if request.method().is_get_or_head() && request.is_directory() {
            match self.default_file(&request) {
                Some(index) => {
                    debug!("[ID{}]使用默认首页{}", id, index.path());
                    request = index;
                }
                None => {
                    if !info.path().ends_with('/') {
                        let location = match info.query() {
                            Some(q) => format!("{}/?{}", info.path(), q),
                            None => format!("{}/", info.path()),
                        };
                        debug!("[ID{}]重定向到{}", id, location);
                        return HttpResponse::redirect(&location).send(exchange);
                    }
                    if !self.ctx.allow_directory_browse(&request) {
                        warn!("[ID{}]不允许浏览目录/{}", id, request.path());
                        return HttpResponse::access_denied(info).send(exchange);
                    }
                }
            }
        }

        match request.method() {
            HttpRequestMethod::Get | HttpRequestMethod::Head => {}
            HttpRequestMethod::Post => match self.handle_post(id, info, &request) {
                PostOutcome::Response(mut response) => return response.send(exchange),
                PostOutcome::File(file) => {
                    debug!("[ID{}]POST结果转为GET：{}", id, file.display());
                    request = request.for_file(self.scratch_dir.as_deref(), &file).into_get();
                }
                PostOutcome::Unhandled => {
                    warn!("[ID{}]没有处理器接受POST /{}", id, request.path());
                    return HttpResponse::service_unavailable(info, "该地址不接受POST请求。")
                        .send(exchange);
                }
                PostOutcome::Invalid(reason) => {
                    error!("[ID{}]POST处理器返回了无效结果：{}", id, reason);
                    return HttpResponse::internal_error(info, &reason).send(exchange);
                }
            },
            _ => {
                warn!("[ID{}]不支持的请求方法{}", id, request.method_name());
                return HttpResponse::method_not_allowed(info).send(exchange);
            }
        }

        self.serve(id, exchange, info, request)
    }

    /// 第一个存在且不是目录的默认首页
    fn default_file(&self, request: &Request) -> Option<Request> {
        self.ctx
            .default_files()
            .iter()
            .map(|name| request.child(name))
            .find(|r| r.exists() && !r.is_directory())
    }

    fn handle_post(&self, id: u64, info: &ExchangeInfo, request: &Request) -> PostOutcome {
        let handler = self.ctx.post_handler_for(request);
        let mut response = HttpResponse::new();
        handler.handle_post(id, info, request, &mut response, self.scratch_dir.as_deref())
    }

    fn serve(
        &self,
        id: u64,
        exchange: &mut Exchange,
        info: &ExchangeInfo,
        mut request: Request,
    ) -> io::Result<()> {
        let handler = self.ctx.handler_for(&request.extension());

        if request.is_directory() {
            return match handler.list_directory(&request) {
                Some(html) => {
                    let mut response = HttpResponse::new();
                    response
                        .set_mime_type("text/html;charset=utf-8")
                        .set_body(html)
                        .set_head_only(request.method() == HttpRequestMethod::Head);
                    response.send(exchange)
                }
                None => HttpResponse::access_denied(info).send(exchange),
            };
        }

        if handler.is_cacheable(id, info, &request) {
            request.etag(false);
            if request.check_client_cache() {
                debug!("[ID{}]客户端缓存有效，返回304", id);
                let mut response = HttpResponse::not_modified();
                if let Some(etag) = request.etag(false) {
                    response.set_header("ETag", &quoted(&etag));
                }
                return response.send(exchange);
            }
        }

        if !handler.pre_serve(id, info, &request) {
            debug!("[ID{}]pre_serve拒绝了/{}", id, request.path());
            return HttpResponse::not_found(info).send(exchange);
        }

        if !request.exists() && request.is_archive() {
            if let Some(alternate) = self.ctx.alternate_home() {
                let fallback = request.derive(&Backing::file_system(alternate), request.path());
                if fallback.exists() {
                    debug!("[ID{}]归档中没有/{}，使用备用目录", id, request.path());
                    request = fallback;
                }
            }
        }

        if !request.exists() {
            if let Some(substitute) = handler.on_file_not_found(id, info, &request) {
                debug!("[ID{}]使用替代资源/{}", id, substitute.path());
                request = substitute;
                if handler.is_cacheable(id, info, &request) {
                    request.etag(true);
                }
            }
        }
        if !request.exists() {
            info!("[ID{}]资源/{}不存在", id, request.path());
            handler.post_serve(id, info, &request, false);
            return HttpResponse::not_found(info).send(exchange);
        }
        if !request.is_readable() {
            warn!("[ID{}]资源/{}不可读", id, request.path());
            handler.post_serve(id, info, &request, false);
            return HttpResponse::access_denied(info).send(exchange);
        }

        let result = self.send_result(id, exchange, info, handler.as_ref(), &mut request);
        handler.post_serve(id, info, &request, result.is_ok());
        result
    }

    /// 组装并发送 200 响应
    fn send_result(
        &self,
        id: u64,
        exchange: &mut Exchange,
        info: &ExchangeInfo,
        handler: &dyn ContentHandler,
        request: &mut Request,
    ) -> io::Result<()> {
        let provides_body = handler.provides_body(id, info, request);
        if provides_body {
            request.choose_encoding();
        } else {
            request.negotiate_content(id, info, handler);
        }
        let head_only = request.method() == HttpRequestMethod::Head;

        // 先打开字节流：编码文件读取失败时会退回原始内容并撤销编码，必须在写响应头之前完成
        let mut stream = if head_only || provides_body {
            None
        } else {
            request.stream(true)
        };

        let replaced = handler.serve_headers(id, info, request);
        let user_headers = replaced.is_some();
        let mut response = replaced.unwrap_or_else(|| {
            let mut r = HttpResponse::new();
            let accept: Vec<String> = info
                .headers()
                .get_all("Accept")
                .iter()
                .flat_map(|v| v.split(','))
                .map(|t| t.split(';').next().unwrap_or("").trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            r.set_mime_type(&negotiate_mime(&request.extension(), &accept));
            r
        });

        if handler.is_cacheable(id, info, request) {
            if let Some(etag) = request.etag(false) {
                response.set_header("ETag", &quoted(&etag));
            }
            if let Some(modified) = request.modified() {
                response.set_header("Last-Modified", &format_http_date(modified));
            }
        }
        match request.encoding() {
            Some(encoding) if !response.headers().contains("Content-Encoding") => {
                response.set_header("Content-Encoding", &encoding.to_string());
            }
            _ => {}
        }
        if request.headers().any_value_contains("Pragma", "no-cache") {
            response.set_header("Pragma", "no-cache");
        }

        if head_only {
            let length = match (user_headers, response.content_length()) {
                (true, n) if n >= 0 => n,
                _ => request.content_length(),
            };
            return response.send_headers(exchange, length);
        }

        if let Some(mut body) = handler.serve_body(id, info, request) {
            let length = response.content_length();
            if length < 0 {
                error!("[ID{}]处理器提供了响应体，但没有给出Content-Length", id);
                return HttpResponse::internal_error(info, "响应长度未知。").send(exchange);
            }
            response.send_headers(exchange, length)?;
            let sent = HttpResponse::send_data(exchange, &mut body)?;
            debug!("[ID{}]发送了处理器提供的{}字节", id, sent);
            return Ok(());
        }

        if response.body().is_some() {
            return response.send(exchange);
        }

        match stream.as_mut() {
            Some(stream) => {
                response.send_headers(exchange, request.content_length())?;
                let sent = HttpResponse::send_data(exchange, stream)?;
                debug!(
                    "[ID{}]发送/{}，{}字节，编码{:?}",
                    id,
                    request.path(),
                    sent,
                    request.encoding()
                );
                Ok(())
            }
            None => {
                error!("[ID{}]无法打开/{}", id, request.path());
                HttpResponse::internal_error(info, "无法读取资源。").send(exchange)
            }
        }
    }
}

fn quoted(etag: &str) -> String {
    ["\"", etag, "\""].concat()
}
