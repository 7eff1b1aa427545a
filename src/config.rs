// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::warn;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::exception::Exception;

/// 执行请求的线程策略
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreadModel {
    /// 单个工作线程，请求串行执行
    Single,
    /// 核心线程数固定，最大线程数不设上限
    Multi,
    /// 固定大小的线程池，超出的请求排队等待
    Pool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_home")]
    home: PathBuf,
    #[serde(default)]
    archive_dir: Option<String>,
    #[serde(default)]
    alternate_home: Option<PathBuf>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_true")]
    local: bool,
    #[serde(default = "default_thread_model")]
    thread_model: ThreadModel,
    #[serde(default)]
    pool_size: usize,
    #[serde(default)]
    pool_max: usize,
    #[serde(default = "default_true")]
    caching: bool,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default = "default_etag_cache_size")]
    etag_cache_size: usize,
    #[serde(default)]
    verbose: bool,
    #[serde(default = "default_files")]
    default_files: Vec<String>,
    #[serde(default = "default_combined_delimiter")]
    combined_delimiter: String,
    #[serde(default = "default_combined_extensions")]
    combined_extensions: Vec<String>,
    #[serde(default)]
    combined_strict: bool,
    #[serde(default = "default_true")]
    directory_browse: bool,
    #[serde(default = "default_read_timeout")]
    read_timeout: u64,
}

fn default_home() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_thread_model() -> ThreadModel {
    ThreadModel::Multi
}

fn default_etag_cache_size() -> usize {
    256
}

fn default_files() -> Vec<String> {
    vec!["index.html".to_string(), "index.htm".to_string()]
}

fn default_read_timeout() -> u64 {
    30
}

fn default_combined_delimiter() -> String {
    "!+!".to_string()
}

fn default_combined_extensions() -> Vec<String> {
    vec![".css".to_string(), ".js".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            home: default_home(),
            archive_dir: None,
            alternate_home: None,
            port: default_port(),
            local: true,
            thread_model: default_thread_model(),
            pool_size: 0,
            pool_max: 0,
            caching: true,
            cache_dir: None,
            etag_cache_size: default_etag_cache_size(),
            verbose: false,
            default_files: default_files(),
            combined_delimiter: default_combined_delimiter(),
            combined_extensions: default_combined_extensions(),
            combined_strict: false,
            directory_browse: true,
            read_timeout: default_read_timeout(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let text = fs::read_to_string(filename)
            .map_err(|e| Exception::Config(format!("cannot read {}: {}", filename, e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(text).map_err(|e| Exception::Config(e.to_string()))?;
        if raw_config.etag_cache_size == 0 {
            warn!("etag_cache_size被设置为0，ETag缓存不能被禁用，因此该值将被改为1。");
            raw_config.etag_cache_size = 1;
        }
        Ok(raw_config)
    }
}

// 构造器风格的设置方法，供嵌入方在代码中组装配置
impl Config {
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn with_archive_dir(mut self, dir: impl Into<String>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn with_alternate_home(mut self, dir: impl Into<PathBuf>) -> Self {
        self.alternate_home = Some(dir.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_thread_model(mut self, model: ThreadModel, size: usize, max: usize) -> Self {
        self.thread_model = model;
        self.pool_size = size;
        self.pool_max = max;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_default_files(mut self, files: Vec<String>) -> Self {
        self.default_files = files;
        self
    }

    pub fn with_combined(mut self, delimiter: &str, extensions: Vec<String>, strict: bool) -> Self {
        self.combined_delimiter = delimiter.to_string();
        self.combined_extensions = extensions;
        self.combined_strict = strict;
        self
    }

    pub fn with_directory_browse(mut self, allow: bool) -> Self {
        self.directory_browse = allow;
        self
    }

    /// 读取请求的超时秒数，0 表示不限时
    pub fn with_read_timeout(mut self, seconds: u64) -> Self {
        self.read_timeout = seconds;
        self
    }
}

impl Config {
    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    pub fn archive_dir(&self) -> Option<&str> {
        self.archive_dir.as_deref()
    }

    pub fn alternate_home(&self) -> Option<&PathBuf> {
        self.alternate_home.as_ref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn thread_model(&self) -> ThreadModel {
        self.thread_model
    }

    /// 核心线程数，0 表示取 CPU 核数
    pub fn pool_size(&self) -> usize {
        if self.pool_size == 0 {
            num_cpus::get()
        } else {
            self.pool_size
        }
    }

    /// 最大线程数，0 表示与核心线程数相同
    pub fn pool_max(&self) -> usize {
        if self.pool_max == 0 {
            self.pool_size()
        } else {
            self.pool_max
        }
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    pub fn cache_dir(&self) -> Option<&PathBuf> {
        self.cache_dir.as_ref()
    }

    pub fn etag_cache_size(&self) -> usize {
        self.etag_cache_size
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout {
            0 => None,
            n => Some(Duration::from_secs(n)),
        }
    }

    pub fn default_files(&self) -> &[String] {
        &self.default_files
    }

    pub fn combined_delimiter(&self) -> &str {
        &self.combined_delimiter
    }

    pub fn combined_extensions(&self) -> &[String] {
        &self.combined_extensions
    }

    pub fn combined_strict(&self) -> bool {
        self.combined_strict
    }

    pub fn directory_browse(&self) -> bool {
        self.directory_browse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.thread_model(), ThreadModel::Multi);
        assert_eq!(config.default_files(), &["index.html", "index.htm"]);
        assert_eq!(config.combined_delimiter(), "!+!");
        assert!(config.caching());
        assert!(!config.combined_strict());
    }

    #[test]
    fn test_thread_model_from_toml() {
        let config = Config::from_toml_str(
            r#"
            home = "/srv/www"
            thread_model = "pool"
            pool_size = 4
            pool_max = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.thread_model(), ThreadModel::Pool);
        assert_eq!(config.pool_size(), 4);
        assert_eq!(config.pool_max(), 8);
        assert_eq!(config.home(), &PathBuf::from("/srv/www"));
    }

    #[test]
    fn test_read_timeout() {
        assert_eq!(Config::new().read_timeout(), Some(Duration::from_secs(30)));
        let config = Config::from_toml_str("read_timeout = 0").unwrap();
        assert_eq!(config.read_timeout(), None);
        assert_eq!(
            Config::new().with_read_timeout(2).read_timeout(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_zero_pool_size_uses_cpus() {
        let config = Config::new();
        assert_eq!(config.pool_size(), num_cpus::get());
        assert_eq!(config.pool_max(), config.pool_size());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(matches!(
            Config::from_toml_str("port = \"abc\""),
            Err(Exception::Config(_))
        ));
    }
}
