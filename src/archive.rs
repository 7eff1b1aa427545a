// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 归档文件索引
//!
//! 服务器可以直接从 jar/zip 归档或 tar 归档（包括 gzip 压缩的 `.tar.gz`/`.tgz`）中提供内容，
//! 格式由文件头识别。归档在启动时被完整读取并建立索引，之后每个请求只访问内存中的条目，
//! 不持有任何打开的文件句柄。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use log::{debug, info};
use tar::{Archive, EntryType};
use zip::ZipArchive;

use crate::exception::Exception;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// 归档中的一个条目（文件或目录）
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    is_dir: bool,
    data: Bytes,
    modified: SystemTime,
}

impl ArchiveEntry {
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}

/// tar 归档的内存索引，键为不带首尾 `/` 的成员路径
#[derive(Debug)]
pub struct ArchiveIndex {
    source: PathBuf,
    entries: BTreeMap<String, ArchiveEntry>,
}

impl ArchiveIndex {
    /// 打开并索引磁盘上的归档，根据文件头识别 zip/jar 与 gzip 压缩的 tar
    pub fn open(path: &Path) -> Result<Self, Exception> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 4];
        {
            let buf = reader.fill_buf()?;
            let n = buf.len().min(magic.len());
            magic[..n].copy_from_slice(&buf[..n]);
        }
        let index = if magic == ZIP_MAGIC {
            Self::from_zip(reader, path)?
        } else if magic[..2] == GZIP_MAGIC {
            Self::from_reader(GzDecoder::new(reader), path)?
        } else {
            Self::from_reader(reader, path)?
        };
        info!(
            "归档{}已载入，共{}个条目",
            path.display(),
            index.entries.len()
        );
        Ok(index)
    }

    fn empty(source: &Path) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), directory_entry(UNIX_EPOCH));
        Self {
            source: source.to_path_buf(),
            entries,
        }
    }

    /// 从未压缩的 tar 字节流建立索引
    pub fn from_reader<R: Read>(reader: R, source: &Path) -> Result<Self, Exception> {
        let mut archive = Archive::new(reader);
        let mut index = Self::empty(source);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = clean_member_path(&entry.path()?.to_string_lossy());
            let modified = UNIX_EPOCH + Duration::from_secs(entry.header().mtime().unwrap_or(0));
            match entry.header().entry_type() {
                EntryType::Directory => index.insert(name, directory_entry(modified)),
                EntryType::Regular | EntryType::Continuous => {
                    let mut data = Vec::with_capacity(entry.size() as usize);
                    entry.read_to_end(&mut data)?;
                    index.insert(name, file_entry(data, modified));
                }
                other => debug!("忽略归档成员{}，类型{:?}", name, other),
            }
        }
        Ok(index)
    }

    /// 从 zip（jar）归档建立索引，路径不安全的成员被跳过
    pub fn from_zip<R: Read + Seek>(reader: R, source: &Path) -> Result<Self, Exception> {
        let mut archive = ZipArchive::new(reader).map_err(|e| Exception::Archive(e.to_string()))?;
        let mut index = Self::empty(source);

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| Exception::Archive(e.to_string()))?;
            let name = match file.enclosed_name() {
                Some(p) => clean_member_path(&p.to_string_lossy().replace('\\', "/")),
                None => {
                    debug!("忽略路径不安全的归档成员{}", file.name());
                    continue;
                }
            };
            let modified = file
                .last_modified()
                .and_then(|t| zip_time(&t))
                .unwrap_or(UNIX_EPOCH);
            if file.is_dir() {
                index.insert(name, directory_entry(modified));
            } else {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                index.insert(name, file_entry(data, modified));
            }
        }
        Ok(index)
    }

    /// 登记一个条目，并补齐它的路径隐含的上级目录
    fn insert(&mut self, name: String, entry: ArchiveEntry) {
        let modified = entry.modified;
        let mut parent = name.clone();
        match entry.is_dir {
            // 显式的目录条目不覆盖已有的同名文件
            true => {
                self.entries.entry(name).or_insert(entry);
            }
            false => {
                self.entries.insert(name, entry);
            }
        }
        while let Some(i) = parent.rfind('/') {
            parent.truncate(i);
            self.entries
                .entry(parent.clone())
                .or_insert_with(|| directory_entry(modified));
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn entry(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.get(&clean_member_path(path))
    }

    /// 列出某个目录的直接子条目，返回 (名字, 条目)
    pub fn children(&self, dir: &str) -> Vec<(String, &ArchiveEntry)> {
        let dir = clean_member_path(dir);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, v)| {
                let rest = &k[prefix.len()..];
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some((rest.to_string(), v))
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn file_entry(data: Vec<u8>, modified: SystemTime) -> ArchiveEntry {
    ArchiveEntry {
        is_dir: false,
        data: Bytes::from(data),
        modified,
    }
}

/// zip 中记录的是不带时区的 DOS 时间，按 UTC 处理
fn zip_time(time: &zip::DateTime) -> Option<SystemTime> {
    let seconds = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?
        .and_utc()
        .timestamp();
    Some(UNIX_EPOCH + Duration::from_secs(u64::try_from(seconds).ok()?))
}

fn directory_entry(modified: SystemTime) -> ArchiveEntry {
    ArchiveEntry {
        is_dir: true,
        data: Bytes::new(),
        modified,
    }
}

/// 成员路径统一成 `a/b/c` 的形式
pub fn clean_member_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
