// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # httpdbase
//!
//! 可嵌入的 HTTP 服务器框架，从本地目录或 tar 归档中提供静态资源，支持：
//! - 按后缀名注册的内容处理器（含模板处理器）与按 URL/后缀名注册的 POST 处理器；
//! - ETag / If-Modified-Since 客户端缓存校验；
//! - gzip/deflate 内容协商，编码结果按 ETag 缓存在磁盘上；
//! - 合并请求：`a.css!+!b.css` 一次返回多个同类型文件拼接后的内容。

pub mod archive;
pub mod cache;
pub mod combined;
pub mod config;
pub mod dispatch;
pub mod exception;
pub mod exchange;
pub mod handler;
pub mod headers;
pub mod logger;
pub mod param;
pub mod request;
pub mod resource;
pub mod response;
pub mod server;
pub mod session;
pub mod template;
pub mod util;

pub use config::{Config, ThreadModel};
pub use dispatch::RequestHandler;
pub use exception::Exception;
pub use exchange::{Exchange, ExchangeInfo};
pub use handler::{ContentHandler, DefaultHandler, PostHandler, PostOutcome};
pub use headers::Headers;
pub use param::{HttpEncoding, HttpRequestMethod};
pub use request::Request;
pub use resource::{Backing, Resource, SortBy};
pub use response::HttpResponse;
pub use server::{Httpd, ServerContext, ServerState};
pub use session::SessionManager;
pub use template::{Templatable, TemplatableAdapter, Template, TemplateHandler, TemplateRegistry};
