// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在配置、启动以及请求处理生命周期中可能出现的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖 I/O 错误、合并请求（combined request）的编码校验错误、
//!   请求报文解析错误、归档文件读取错误以及服务器生命周期错误。
//! - **边界转换**：资源级和处理器级的异常会在分发边界被转换为 HTTP 状态码，
//!   不会继续向传输层传播。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志中。

use std::fmt;
use std::io;

/// 服务器运行过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 底层 I/O 错误（文件系统、归档、网络）。
    Io(io::Error),
    /// 合并请求中第一个文件的后缀不在允许合并的后缀集合中。
    UnsupportedExtension(String),
    /// 合并请求中的文件后缀不一致，例如同时出现 `.css` 与 `.js`。
    MixedExtensions { expected: String, found: String },
    /// 请求行无法解析（缺少方法或 URI）。
    MalformedRequest(String),
    /// 请求路径经 `..` 解析后越过了根目录。
    PathOutsideRoot(String),
    /// 线程模型配置非法，例如线程池的最大值小于核心值。
    InvalidThreadModel(String),
    /// 服务器已经启动，不能再次启动。
    AlreadyStarted,
    /// 服务器尚未启动或已经停止。
    NotStarted,
    /// 归档文件无法读取或其中没有可服务的目录。
    Archive(String),
    /// 配置文件无法解析。
    Config(String),
}

use Exception::*;

impl fmt::Display for Exception {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Io(e) => write!(f, "I/O error: {}", e),
            UnsupportedExtension(ext) => write!(f, "Unsupported extension {}", ext),
            MixedExtensions { expected, found } => write!(
                f,
                "Combined request mixes extensions: expected {}, found {}",
                expected, found
            ),
            MalformedRequest(line) => write!(f, "Malformed request line: {}", line),
            PathOutsideRoot(path) => write!(f, "Path escapes the document root: {}", path),
            InvalidThreadModel(reason) => write!(f, "Invalid thread model: {}", reason),
            AlreadyStarted => write!(f, "Server already started"),
            NotStarted => write!(f, "Server not started"),
            Archive(reason) => write!(f, "Archive error: {}", reason),
            Config(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e)
    }
}
