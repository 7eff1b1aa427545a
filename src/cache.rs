// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::fs;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, info, warn};
use lru::LruCache;
use tempfile::NamedTempFile;

use crate::{exception::Exception, param::HttpEncoding};

const CACHE_SUBDIR: &str = "httpdbase";

/// 存放各编码变体的磁盘缓存目录。
///
/// 文件名为 `{ETag 或请求序号}.{编码}`，另有正在生成中的 `content*.tmp`/`combine*.tmp` 临时文件。
#[derive(Debug, Clone)]
pub struct CacheDir {
    path: PathBuf,
}

impl CacheDir {
    /// 创建缓存目录并确认可写。`base` 为空时使用系统临时目录。
    pub fn create(base: Option<&Path>) -> Result<Self, Exception> {
        let path = match base {
            Some(b) => b.to_path_buf(),
            None => std::env::temp_dir().join(CACHE_SUBDIR).join("Cache"),
        };
        fs::create_dir_all(&path)?;
        // 能创建临时文件才算可写
        NamedTempFile::new_in(&path)?;
        info!("缓存目录：{}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_path(&self, key: &str, encoding: HttpEncoding) -> PathBuf {
        self.path.join(format!("{}.{}", key, encoding))
    }

    /// 在缓存目录中创建一个临时文件，未被持久化的话在释放时自动删除
    pub fn scratch_file(&self, prefix: &str) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".tmp")
            .tempfile_in(&self.path)
    }

    /// 删除某个键对应的全部编码变体
    pub fn invalidate(&self, key: &str) {
        for encoding in [HttpEncoding::Gzip, HttpEncoding::Deflate] {
            let path = self.entry_path(key, encoding);
            if path.exists() {
                match fs::remove_file(&path) {
                    Ok(()) => debug!("缓存文件{}已失效并删除", path.display()),
                    Err(e) => warn!("无法删除失效的缓存文件{}：{}", path.display(), e),
                }
            }
        }
    }
}

/// 把 `input` 用给定编码压缩后写入 `output`，返回压缩完成的 writer
pub fn compress<R, W>(input: &mut R, output: W, encoding: HttpEncoding) -> io::Result<W>
where
    R: Read + ?Sized,
    W: Write,
{
    match encoding {
        HttpEncoding::Gzip => {
            let mut encoder = GzEncoder::new(output, Compression::default());
            io::copy(input, &mut encoder)?;
            encoder.finish()
        }
        HttpEncoding::Deflate => {
            let mut encoder = DeflateEncoder::new(output, Compression::default());
            io::copy(input, &mut encoder)?;
            encoder.finish()
        }
    }
}

/// 内存中的压缩，`None` 表示原样返回
pub fn compress_bytes(data: &[u8], mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    match mode {
        Some(encoding) => compress(&mut &data[..], Vec::new(), encoding),
        None => Ok(data.to_vec()),
    }
}

#[derive(Clone)]
struct EtagEntry {
    etag: String,
    modified_time: SystemTime,
    len: u64,
}

/// 以绝对路径为键的 ETag 缓存，修改时间或长度变化即视为失效
pub struct EtagCache {
    cache: LruCache<String, EtagEntry>,
}

impl EtagCache {
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn push(&mut self, path: &str, etag: &str, modified_time: SystemTime, len: u64) {
        let entry = EtagEntry {
            etag: etag.to_string(),
            modified_time,
            len,
        };
        self.cache.put(path.to_string(), entry);
    }

    pub fn find(&mut self, path: &str, modified_time: SystemTime, len: u64) -> Option<String> {
        match self.cache.get(path) {
            Some(entry) if entry.modified_time == modified_time && entry.len == len => {
                Some(entry.etag.clone())
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
