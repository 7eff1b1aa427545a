// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器与处理器注册表
//!
//! [`Httpd`] 持有：
//! - 后缀名 → 内容处理器、URL/后缀名 → POST 处理器两张映射表；
//! - 默认首页文件列表、缓存开关、目录浏览许可回调等配置；
//! - 线程模型以及监听器的启动/停止生命周期。
//!
//! 启动时注册表被冻结为一个只读的 [`ServerContext`]，在所有工作线程之间共享。
//! 启动之后再调用设置方法不会产生任何效果。

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::{net::TcpListener, runtime::Builder, runtime::Runtime, sync::watch};

use crate::{
    archive::ArchiveIndex,
    cache::{CacheDir, EtagCache},
    combined::CombineRules,
    config::{Config, ThreadModel},
    dispatch::RequestHandler,
    exception::Exception,
    exchange::Exchange,
    handler::{ContentHandler, DefaultHandler, PostHandler},
    request::Request,
    resource::Backing,
    session::SessionManager,
};

/// 目录浏览许可回调，返回 `false` 时目录请求得到 403
pub type BrowseCheck = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// 增长型线程池没有上限时实际使用的阻塞线程数
const UNBOUNDED_BLOCKING_THREADS: usize = 512;

/// 归档模式下备用文件目录的默认名字
const ALTERNATE_DOCS: &str = "AlternateDocs";

/// 服务器的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Started,
    Stopped,
}

/// 启动时冻结的只读注册表，以及跨请求共享的可变状态（序号计数器、ETag 缓存、会话变量）
pub struct ServerContext {
    handlers: HashMap<String, Arc<dyn ContentHandler>>,
    post_handlers: HashMap<String, Arc<dyn PostHandler>>,
    default_handler: Arc<dyn ContentHandler>,
    default_post_handler: Arc<dyn PostHandler>,
    default_files: Vec<String>,
    caching: bool,
    verbose: bool,
    directory_browse: bool,
    browse: BrowseCheck,
    rules: CombineRules,
    cache_dir: Option<CacheDir>,
    etag_cache: Mutex<EtagCache>,
    sequence: Arc<AtomicU64>,
    sessions: Arc<SessionManager>,
    alternate_home: Option<PathBuf>,
}

impl ServerContext {
    /// 下一个交换序号，单调递增
    pub fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn cache_dir(&self) -> Option<&CacheDir> {
        self.cache_dir.as_ref()
    }

    pub fn combine_rules(&self) -> &CombineRules {
        &self.rules
    }

    pub fn etag_cache(&self) -> &Mutex<EtagCache> {
        &self.etag_cache
    }

    /// 跨请求共享的会话变量
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn default_files(&self) -> &[String] {
        &self.default_files
    }

    pub fn alternate_home(&self) -> Option<&Path> {
        self.alternate_home.as_deref()
    }

    pub fn allow_directory_browse(&self, request: &Request) -> bool {
        self.directory_browse && (self.browse)(request)
    }

    /// 按后缀名查找内容处理器，找不到时使用默认处理器
    pub fn handler_for(&self, extension: &str) -> Arc<dyn ContentHandler> {
        self.handlers
            .get(&extension_key(extension))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_handler))
    }

    /// 查找 POST 处理器：精确匹配 `{path}` 或 `/{path}` 优先，其次按后缀名，最后使用默认处理器
    pub fn post_handler_for(&self, request: &Request) -> Arc<dyn PostHandler> {
        let path = request.path();
        self.post_handlers
            .get(path)
            .or_else(|| self.post_handlers.get(&format!("/{}", path)))
            .or_else(|| {
                self.post_handlers
                    .get(&format!(".{}", extension_key(&request.extension())))
            })
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_post_handler))
    }
}

/// 后缀名统一为小写、不带点
fn extension_key(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

/// POST 处理器的键：以 `.` 开头的视为后缀名，其余视为 URL
fn post_key(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('.') {
        format!(".{}", extension_key(name))
    } else {
        name.to_string()
    }
}

/// 可嵌入的 HTTP 服务器
pub struct Httpd {
    config: Config,
    handlers: HashMap<String, Arc<dyn ContentHandler>>,
    post_handlers: HashMap<String, Arc<dyn PostHandler>>,
    default_handler: Arc<dyn ContentHandler>,
    default_post_handler: Arc<dyn PostHandler>,
    browse: BrowseCheck,
    sequence: Arc<AtomicU64>,
    sessions: Arc<SessionManager>,
    state: ServerState,
    runtime: Option<Runtime>,
    shutdown: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
}

impl Httpd {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            post_handlers: HashMap::new(),
            default_handler: Arc::new(DefaultHandler),
            default_post_handler: Arc::new(DefaultHandler),
            browse: Arc::new(|_: &Request| true),
            sequence: Arc::new(AtomicU64::new(0)),
            sessions: Arc::new(SessionManager::new()),
            state: ServerState::NotStarted,
            runtime: None,
            shutdown: None,
            local_addr: None,
        }
    }

    /// 以目录 `home` 为根的服务器
    pub fn file(home: impl Into<PathBuf>) -> Self {
        Self::new(Config::new().with_home(home))
    }

    /// 以归档 `archive` 中的 `dir` 目录为根的服务器
    pub fn archive(archive: impl Into<PathBuf>, dir: &str) -> Self {
        Self::new(Config::new().with_home(archive).with_archive_dir(dir))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 已分配的交换序号个数
    pub fn request_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// 启动后注册表只读，返回 `false` 表示本次修改被忽略
    fn mutable(&self, what: &str) -> bool {
        if self.state == ServerState::Started {
            warn!("服务器已启动，忽略对{}的修改", what);
            false
        } else {
            true
        }
    }

    fn update_config(&mut self, what: &str, f: impl FnOnce(Config) -> Config) -> bool {
        if !self.mutable(what) {
            return false;
        }
        self.config = f(std::mem::take(&mut self.config));
        true
    }
}

// 注册表
impl Httpd {
    /// 为后缀名注册内容处理器，`css`、`.css`、`.CSS` 是同一个键
    pub fn add_handler(&mut self, extension: &str, handler: Arc<dyn ContentHandler>) -> bool {
        if !self.mutable("内容处理器") {
            return false;
        }
        self.handlers.insert(extension_key(extension), handler);
        true
    }

    pub fn remove_handler(&mut self, extension: &str) -> Option<Arc<dyn ContentHandler>> {
        if !self.mutable("内容处理器") {
            return None;
        }
        self.handlers.remove(&extension_key(extension))
    }

    /// 注册 POST 处理器。`name` 以 `.` 开头时按后缀名匹配，否则按请求路径精确匹配。
    pub fn add_post_handler(&mut self, name: &str, handler: Arc<dyn PostHandler>) -> bool {
        if !self.mutable("POST处理器") {
            return false;
        }
        self.post_handlers.insert(post_key(name), handler);
        true
    }

    pub fn remove_post_handler(&mut self, name: &str) -> Option<Arc<dyn PostHandler>> {
        if !self.mutable("POST处理器") {
            return None;
        }
        self.post_handlers.remove(&post_key(name))
    }

    pub fn set_default_handler(&mut self, handler: Arc<dyn ContentHandler>) -> bool {
        if !self.mutable("默认处理器") {
            return false;
        }
        self.default_handler = handler;
        true
    }

    pub fn set_default_post_handler(&mut self, handler: Arc<dyn PostHandler>) -> bool {
        if !self.mutable("默认POST处理器") {
            return false;
        }
        self.default_post_handler = handler;
        true
    }

    pub fn set_directory_browse(&mut self, check: BrowseCheck) -> bool {
        if !self.mutable("目录浏览许可") {
            return false;
        }
        self.browse = check;
        true
    }

    pub fn set_default_files(&mut self, files: Vec<String>) -> bool {
        self.update_config("默认首页", |c| c.with_default_files(files))
    }

    pub fn add_default_file(&mut self, file: &str) -> bool {
        let mut files = self.config.default_files().to_vec();
        if files.iter().any(|f| f == file) {
            return true;
        }
        files.push(file.to_string());
        self.set_default_files(files)
    }

    pub fn set_caching(&mut self, caching: bool) -> bool {
        self.update_config("缓存开关", |c| c.with_caching(caching))
    }

    pub fn set_cache_dir(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        self.update_config("缓存目录", |c| c.with_cache_dir(dir))
    }

    pub fn set_verbose(&mut self, verbose: bool) -> bool {
        self.update_config("日志详细程度", |c| c.with_verbose(verbose))
    }

    pub fn set_port(&mut self, port: u16) -> bool {
        self.update_config("端口", |c| c.with_port(port))
    }

    /// 设置线程模型。`size`/`max` 为 0 时取 CPU 核数。
    pub fn set_thread_model(&mut self, model: ThreadModel, size: usize, max: usize) -> bool {
        self.update_config("线程模型", |c| c.with_thread_model(model, size, max))
    }

    pub fn set_combined(&mut self, delimiter: &str, extensions: Vec<String>, strict: bool) -> bool {
        self.update_config("合并请求规则", |c| c.with_combined(delimiter, extensions, strict))
    }
}

// 上下文与分发器
impl Httpd {
    /// 把当前注册表冻结为请求处理上下文，同时创建缓存目录
    pub fn context(&self) -> Result<Arc<ServerContext>, Exception> {
        let cache_dir = match CacheDir::create(self.config.cache_dir().map(|p| p.as_path())) {
            Ok(dir) => Some(dir),
            Err(e) => {
                error!("无法创建缓存目录：{}，压缩与合并将只在内存中进行", e);
                None
            }
        };
        let rules = CombineRules::new(
            self.config.combined_delimiter(),
            self.config.combined_extensions(),
            self.config.combined_strict(),
        )?;
        Ok(Arc::new(ServerContext {
            handlers: self.handlers.clone(),
            post_handlers: self.post_handlers.clone(),
            default_handler: Arc::clone(&self.default_handler),
            default_post_handler: Arc::clone(&self.default_post_handler),
            default_files: self.config.default_files().to_vec(),
            caching: self.config.caching(),
            verbose: self.config.verbose(),
            directory_browse: self.config.directory_browse(),
            browse: Arc::clone(&self.browse),
            rules,
            cache_dir,
            etag_cache: Mutex::new(EtagCache::from_capacity(self.config.etag_cache_size())),
            sequence: Arc::clone(&self.sequence),
            sessions: Arc::clone(&self.sessions),
            alternate_home: self.alternate_home(),
        }))
    }

    fn is_archive_mode(&self) -> bool {
        self.config.home().is_file()
    }

    /// 归档模式下的备用文件目录（同时也是 POST 的可写目录）
    fn alternate_home(&self) -> Option<PathBuf> {
        if !self.is_archive_mode() {
            return None;
        }
        let dir = match self.config.alternate_home() {
            Some(d) => d.clone(),
            None => std::env::temp_dir().join("httpdbase").join(ALTERNATE_DOCS),
        };
        match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                error!("无法创建备用文件目录{}：{}", dir.display(), e);
                None
            }
        }
    }

    /// 根据配置决定资源后端：`home` 是文件时按归档处理，否则按目录处理
    pub fn backing(&self) -> Result<Backing, Exception> {
        let home = self.config.home();
        if self.is_archive_mode() {
            let index = ArchiveIndex::open(home)?;
            let root = self.config.archive_dir().unwrap_or("");
            if !index.entry(root).map(|e| e.is_dir()).unwrap_or(false) {
                return Err(Exception::Archive(format!(
                    "{} has no directory {}",
                    home.display(),
                    root
                )));
            }
            Ok(Backing::archive(Arc::new(index), root))
        } else if home.is_dir() {
            Ok(Backing::file_system(home.clone()))
        } else {
            Err(Exception::Config(format!(
                "home {} is neither a directory nor an archive",
                home.display()
            )))
        }
    }

    /// 创建一个绑定到当前注册表的请求分发器，可直接在内存中的交换上运行
    pub fn request_handler(&self) -> Result<RequestHandler, Exception> {
        let ctx = self.context()?;
        let backing = self.backing()?;
        let scratch = match &backing {
            Backing::FileSystem { home } => Some(home.clone()),
            Backing::Archive { .. } => ctx.alternate_home().map(|p| p.to_path_buf()),
        };
        Ok(RequestHandler::new(ctx, backing, scratch))
    }
}

// 生命周期
impl Httpd {
    fn validate_thread_model(&self) -> Result<(), Exception> {
        // 线程数为 0 时已由配置换算为 CPU 核数
        let size = self.config.pool_size();
        let max = self.config.pool_max();
        match self.config.thread_model() {
            ThreadModel::Pool if max < size => Err(Exception::InvalidThreadModel(format!(
                "pool size {} / max {}",
                size, max
            ))),
            _ => Ok(()),
        }
    }

    fn build_runtime(&self) -> Result<Runtime, Exception> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("httpd-worker");
        match self.config.thread_model() {
            ThreadModel::Single => {
                builder.worker_threads(1).max_blocking_threads(1);
            }
            ThreadModel::Multi => {
                builder
                    .worker_threads(self.config.pool_size())
                    .max_blocking_threads(UNBOUNDED_BLOCKING_THREADS);
            }
            ThreadModel::Pool => {
                builder
                    .worker_threads(self.config.pool_size())
                    .max_blocking_threads(self.config.pool_max());
            }
        }
        Ok(builder.build()?)
    }

    /// 启动监听，返回实际绑定的地址（端口为 0 时由系统分配）
    pub fn start(&mut self) -> Result<SocketAddr, Exception> {
        if self.state == ServerState::Started {
            return Err(Exception::AlreadyStarted);
        }
        self.validate_thread_model()?;
        let handler = Arc::new(self.request_handler()?);
        let runtime = self.build_runtime()?;

        let ip = match self.config.local() {
            true => IpAddr::V4(Ipv4Addr::LOCALHOST),
            false => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let listener = runtime.block_on(TcpListener::bind(SocketAddr::new(ip, self.config.port())))?;
        let local_addr = listener.local_addr()?;
        info!("服务端在{}上监听Socket连接", local_addr);

        let read_timeout = self.config.read_timeout();
        let (tx, mut rx) = watch::channel(false);
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        info!("监听循环接收到停机指令，正在退出...");
                        break;
                    }
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(a) => a,
                            Err(e) => {
                                error!("接受连接失败：{}", e);
                                continue;
                            }
                        };
                        debug!("新的连接：{}", addr);
                        let stream = match stream.into_std().and_then(|s| {
                            s.set_nonblocking(false)?;
                            Ok(s)
                        }) {
                            Ok(s) => s,
                            Err(e) => {
                                error!("无法转换连接{}：{}", addr, e);
                                continue;
                            }
                        };
                        let handler = Arc::clone(&handler);
                        tokio::task::spawn_blocking(move || {
                            match Exchange::read_from(stream, read_timeout) {
                                Ok(exchange) => handler.handle(exchange),
                                Err(e) => error!("无法读取来自{}的请求：{}", addr, e),
                            }
                        });
                    }
                }
            }
        });

        self.runtime = Some(runtime);
        self.shutdown = Some(tx);
        self.local_addr = Some(local_addr);
        self.state = ServerState::Started;
        Ok(local_addr)
    }

    /// 停止监听，并最多等待 `timeout` 让正在处理的请求结束
    pub fn stop(&mut self, timeout: Duration) -> Result<(), Exception> {
        if self.state != ServerState::Started {
            return Err(Exception::NotStarted);
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
        }
        self.state = ServerState::Stopped;
        self.local_addr = None;
        info!("服务器已停止");
        Ok(())
    }
}

impl Drop for Httpd {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
