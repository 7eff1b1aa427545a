// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 资源抽象
//!
//! 对一个可被服务的条目的只读视图。条目可以来自：
//! - 文件系统（主目录 + 相对路径）；
//! - tar 归档（归档索引 + 内部路径）；
//! - 合并请求：若干同类文件按顺序拼接而成的逻辑资源。
//!
//! 四种变体对外暴露完全一致的语义（存在性、长度、修改时间、字节流、ETag、目录列表），
//! 因此请求分发逻辑不需要关心资源的存储方式。

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error};
use sha1::{Digest, Sha1};

use crate::{
    archive::{clean_member_path, ArchiveIndex},
    combined::{CombineRules, CombinedResource},
    exception::Exception,
};

/// 目录列表的排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// 按名字的字典序
    Name,
    /// 按大小升序
    Size,
    /// 按修改时间升序
    Date,
}

/// 单个存储条目（文件或归档成员）需要提供的能力。
///
/// 合并资源由若干个 `Item` 组成，见 [`CombinedResource`]。
pub trait Item: Clone + Send + Sync {
    fn exists(&self) -> bool;
    fn is_readable(&self) -> bool;
    fn is_directory(&self) -> bool;
    fn len(&self) -> u64;
    fn modified(&self) -> Option<SystemTime>;
    /// 相对于主目录的逻辑路径
    fn path(&self) -> &str;
    fn absolute_path(&self) -> String;
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
    fn child(&self, name: &str) -> Self;
    fn list(&self) -> Option<Vec<DirEntry>>;

    fn name(&self) -> String {
        let trimmed = self.path().trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(i) => trimmed[i + 1..].to_string(),
            None => trimmed.to_string(),
        }
    }
}

/// 拼接两段逻辑路径，`dir` 末尾有无 `/` 均可
fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 文件系统中的条目
#[derive(Debug, Clone)]
pub struct FileResource {
    home: PathBuf,
    path: String,
}

impl FileResource {
    pub fn new(home: impl Into<PathBuf>, path: &str) -> Self {
        Self {
            home: home.into(),
            path: path.trim_start_matches('/').to_string(),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn file(&self) -> PathBuf {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() {
            self.home.clone()
        } else {
            self.home.join(trimmed)
        }
    }
}

impl Item for FileResource {
    fn exists(&self) -> bool {
        self.file().exists()
    }

    fn is_readable(&self) -> bool {
        let file = self.file();
        if file.is_dir() {
            fs::read_dir(&file).is_ok()
        } else {
            File::open(&file).is_ok()
        }
    }

    fn is_directory(&self) -> bool {
        self.file().is_dir()
    }

    fn len(&self) -> u64 {
        fs::metadata(self.file()).map(|m| m.len()).unwrap_or(0)
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(self.file()).and_then(|m| m.modified()).ok()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn absolute_path(&self) -> String {
        self.file().to_string_lossy().into_owned()
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.file())?))
    }

    fn child(&self, name: &str) -> Self {
        Self {
            home: self.home.clone(),
            path: join_path(&self.path, name),
        }
    }

    fn list(&self) -> Option<Vec<DirEntry>> {
        let read_dir = match fs::read_dir(self.file()) {
            Ok(r) => r,
            Err(e) => {
                error!("无法读取目录{}：{}", self.file().display(), e);
                return None;
            }
        };
        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let child = self.child(&name);
            let metadata = match dir_entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_dir: metadata.is_dir(),
                resource: Resource::new(ResourceKind::File(child)),
            });
        }
        Some(entries)
    }
}

/// 归档中的条目
#[derive(Debug, Clone)]
pub struct ArchiveResource {
    index: Arc<ArchiveIndex>,
    root: String,
    path: String,
}

impl ArchiveResource {
    pub fn new(index: Arc<ArchiveIndex>, root: &str, path: &str) -> Self {
        Self {
            index,
            root: clean_member_path(root),
            path: path.trim_start_matches('/').to_string(),
        }
    }

    fn key(&self) -> String {
        clean_member_path(&join_path(&self.root, &self.path))
    }
}

impl Item for ArchiveResource {
    fn exists(&self) -> bool {
        self.index.entry(&self.key()).is_some()
    }

    /// 归档中的条目只要存在就可读
    fn is_readable(&self) -> bool {
        self.exists()
    }

    fn is_directory(&self) -> bool {
        self.index
            .entry(&self.key())
            .map(|e| e.is_dir())
            .unwrap_or(false)
    }

    fn len(&self) -> u64 {
        self.index.entry(&self.key()).map(|e| e.len()).unwrap_or(0)
    }

    fn modified(&self) -> Option<SystemTime> {
        self.index.entry(&self.key()).map(|e| e.modified())
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn absolute_path(&self) -> String {
        format!("{}!/{}", self.index.source().display(), self.key())
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self.index.entry(&self.key()) {
            Some(entry) if !entry.is_dir() => Ok(Box::new(io::Cursor::new(entry.data().clone()))),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", self.absolute_path()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", self.absolute_path()),
            )),
        }
    }

    fn child(&self, name: &str) -> Self {
        Self {
            index: Arc::clone(&self.index),
            root: self.root.clone(),
            path: join_path(&self.path, name),
        }
    }

    fn list(&self) -> Option<Vec<DirEntry>> {
        if !self.is_directory() {
            return None;
        }
        let entries = self
            .index
            .children(&self.key())
            .into_iter()
            .map(|(name, entry)| DirEntry {
                size: entry.len(),
                modified: entry.modified(),
                is_dir: entry.is_dir(),
                resource: Resource::new(ResourceKind::Archive(self.child(&name))),
                name,
            })
            .collect();
        Some(entries)
    }
}

/// 目录列表中的一项
#[derive(Debug, Clone)]
pub struct DirEntry {
    name: String,
    size: u64,
    modified: SystemTime,
    is_dir: bool,
    resource: Resource,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        self.resource.open()
    }
}

fn sort_entries(entries: &mut [DirEntry], sort_by: SortBy) {
    match sort_by {
        SortBy::Name => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        SortBy::Size => entries.sort_by(|a, b| a.size.cmp(&b.size).then(a.name.cmp(&b.name))),
        SortBy::Date => {
            entries.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.name.cmp(&b.name)))
        }
    }
}

/// 对若干字节流按顺序计算 SHA-1，结果为小写十六进制。
///
/// 无法打开的流被跳过；读取过程中出错则返回 `None`。
pub fn digest_streams<I>(streams: I) -> Option<String>
where
    I: IntoIterator<Item = io::Result<Box<dyn Read + Send>>>,
{
    let mut hasher = Sha1::new();
    for stream in streams {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                debug!("计算ETag时跳过无法打开的流：{}", e);
                continue;
            }
        };
        if let Err(e) = io::copy(&mut stream, &mut hasher) {
            error!("计算ETag时读取失败：{}", e);
            return None;
        }
    }
    Some(hex::encode(hasher.finalize()))
}

/// 资源的具体变体
#[derive(Debug, Clone)]
pub enum ResourceKind {
    File(FileResource),
    Archive(ArchiveResource),
    CombinedFile(CombinedResource<FileResource>),
    CombinedArchive(CombinedResource<ArchiveResource>),
}

/// 每个请求构造一次的资源，除了惰性计算的 ETag 之外不可变
#[derive(Debug, Clone)]
pub struct Resource {
    kind: ResourceKind,
    etag: Option<String>,
}

macro_rules! each_kind {
    ($self:expr, $r:ident => $body:expr) => {
        match &$self.kind {
            ResourceKind::File($r) => $body,
            ResourceKind::Archive($r) => $body,
            ResourceKind::CombinedFile($r) => $body,
            ResourceKind::CombinedArchive($r) => $body,
        }
    };
}

impl Resource {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind, etag: None }
    }

    pub fn file(home: impl Into<PathBuf>, path: &str) -> Self {
        Self::new(ResourceKind::File(FileResource::new(home, path)))
    }

    pub fn archive(index: Arc<ArchiveIndex>, root: &str, path: &str) -> Self {
        Self::new(ResourceKind::Archive(ArchiveResource::new(index, root, path)))
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn is_combined(&self) -> bool {
        matches!(
            self.kind,
            ResourceKind::CombinedFile(_) | ResourceKind::CombinedArchive(_)
        )
    }

    pub fn is_archive(&self) -> bool {
        matches!(
            self.kind,
            ResourceKind::Archive(_) | ResourceKind::CombinedArchive(_)
        )
    }

    pub fn exists(&self) -> bool {
        each_kind!(self, r => r.exists())
    }

    pub fn is_readable(&self) -> bool {
        each_kind!(self, r => r.is_readable())
    }

    pub fn is_directory(&self) -> bool {
        match &self.kind {
            ResourceKind::File(r) => r.is_directory(),
            ResourceKind::Archive(r) => r.is_directory(),
            _ => false,
        }
    }

    /// 原始内容长度；合并资源在拼接失败时返回 -1
    pub fn len(&self) -> i64 {
        match &self.kind {
            ResourceKind::File(r) => r.len() as i64,
            ResourceKind::Archive(r) => r.len() as i64,
            ResourceKind::CombinedFile(r) => r.len(),
            ResourceKind::CombinedArchive(r) => r.len(),
        }
    }

    pub fn modified(&self) -> Option<SystemTime> {
        each_kind!(self, r => r.modified())
    }

    pub fn path(&self) -> &str {
        each_kind!(self, r => r.path())
    }

    pub fn name(&self) -> String {
        each_kind!(self, r => r.name())
    }

    pub fn absolute_path(&self) -> String {
        each_kind!(self, r => r.absolute_path())
    }

    /// 小写、不带点的后缀名；没有后缀时为空串
    pub fn extension(&self) -> String {
        match &self.kind {
            ResourceKind::CombinedFile(r) => r.extension().to_string(),
            ResourceKind::CombinedArchive(r) => r.extension().to_string(),
            _ => {
                let name = self.name();
                match name.rfind('.') {
                    Some(i) if i + 1 < name.len() => name[i + 1..].to_lowercase(),
                    _ => String::new(),
                }
            }
        }
    }

    /// 原始（未编码的）字节流
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        each_kind!(self, r => r.open())
    }

    /// 当前目录下名为 `name` 的子资源；合并资源没有子资源
    pub fn child(&self, name: &str) -> Option<Resource> {
        match &self.kind {
            ResourceKind::File(r) => Some(Resource::new(ResourceKind::File(r.child(name)))),
            ResourceKind::Archive(r) => Some(Resource::new(ResourceKind::Archive(r.child(name)))),
            _ => None,
        }
    }

    /// 不使用记忆值，直接对内容计算 SHA-1。单个资源不存在或无法打开时没有 ETag。
    pub fn compute_etag(&self) -> Option<String> {
        match &self.kind {
            ResourceKind::File(r) => digest_streams(std::iter::once(Ok(r.open().ok()?))),
            ResourceKind::Archive(r) => digest_streams(std::iter::once(Ok(r.open().ok()?))),
            ResourceKind::CombinedFile(r) => r.etag(),
            ResourceKind::CombinedArchive(r) => r.etag(),
        }
    }

    pub fn etag(&mut self, refresh: bool) -> Option<String> {
        if !refresh {
            if let Some(etag) = &self.etag {
                return Some(etag.clone());
            }
        }
        self.etag = self.compute_etag();
        self.etag.clone()
    }

    /// 由外部（例如 ETag 缓存）提供已知的 ETag
    pub fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    pub fn memoized_etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn list(&self, directories: bool, sort_by: SortBy) -> Option<Vec<DirEntry>> {
        let entries = match &self.kind {
            ResourceKind::File(r) => r.list(),
            ResourceKind::Archive(r) => r.list(),
            _ => None,
        }?;
        let mut selected: Vec<DirEntry> = entries
            .into_iter()
            .filter(|e| e.is_dir == directories)
            .collect();
        sort_entries(&mut selected, sort_by);
        Some(selected)
    }

    pub fn list_files(&self, sort_by: SortBy) -> Option<Vec<DirEntry>> {
        self.list(false, sort_by)
    }

    pub fn list_directories(&self, sort_by: SortBy) -> Option<Vec<DirEntry>> {
        self.list(true, sort_by)
    }
}

/// 资源的存储后端，负责把请求路径解析成资源
#[derive(Debug, Clone)]
pub enum Backing {
    FileSystem { home: PathBuf },
    Archive { index: Arc<ArchiveIndex>, root: String },
}

impl Backing {
    pub fn file_system(home: impl Into<PathBuf>) -> Self {
        Backing::FileSystem { home: home.into() }
    }

    pub fn archive(index: Arc<ArchiveIndex>, root: &str) -> Self {
        Backing::Archive {
            index,
            root: clean_member_path(root),
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Backing::Archive { .. })
    }

    /// 文件系统后端的主目录
    pub fn home(&self) -> Option<&Path> {
        match self {
            Backing::FileSystem { home } => Some(home),
            Backing::Archive { .. } => None,
        }
    }

    pub fn resolve(&self, path: &str) -> Resource {
        match self {
            Backing::FileSystem { home } => Resource::file(home.clone(), path),
            Backing::Archive { index, root } => Resource::archive(Arc::clone(index), root, path),
        }
    }

    /// 把合并请求的 URI 路径解析成合并资源
    pub fn resolve_combined(
        &self,
        uri_path: &str,
        rules: &CombineRules,
        scratch_dir: Option<PathBuf>,
    ) -> Result<Resource, Exception> {
        let (extension, pieces) = rules.split_up(uri_path)?;
        let kind = match self {
            Backing::FileSystem { home } => {
                let items = pieces
                    .iter()
                    .map(|p| FileResource::new(home.clone(), p))
                    .collect();
                ResourceKind::CombinedFile(CombinedResource::new(
                    items,
                    uri_path,
                    &extension,
                    rules,
                    scratch_dir,
                ))
            }
            Backing::Archive { index, root } => {
                let items = pieces
                    .iter()
                    .map(|p| ArchiveResource::new(Arc::clone(index), root, p))
                    .collect();
                ResourceKind::CombinedArchive(CombinedResource::new(
                    items,
                    uri_path,
                    &extension,
                    rules,
                    scratch_dir,
                ))
            }
        };
        Ok(Resource::new(kind))
    }
}
