// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 合并请求
//!
//! 一个 URL 可以用分隔符（默认 `!+!`）列出多个同类型文件，例如
//! `/css/a.css!+!b.css!+!/theme/c.css`，服务器把它们按顺序拼接成一个逻辑资源返回，
//! 以减少浏览器的请求数量。
//!
//! # 路径规则
//! - 第一个文件的后缀必须在允许合并的后缀集合中，其余文件的后缀必须与之相同。
//! - 含有 `/` 的片段被视为从根目录开始的路径，并把它所在的目录记为“当前目录”；
//!   不含 `/` 的片段相对于当前目录解析。
//! - 拼接时每个文件之后追加一个回车符（`\r`）。

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use bytes::Bytes;
use log::{debug, error};
use regex::Regex;
use tempfile::TempPath;

use crate::{
    exception::Exception,
    resource::{digest_streams, Item},
    util::resolve_relative,
};

/// 拼接时放在每个文件后面的分隔字节
pub const ITEM_SEPARATOR: u8 = b'\r';

/// 合并请求的识别与拆分规则
#[derive(Debug, Clone)]
pub struct CombineRules {
    delimiter: String,
    splitter: Regex,
    extensions: Vec<String>,
    strict: bool,
}

impl CombineRules {
    /// `extensions` 中的后缀带不带点均可，比较时不区分大小写
    pub fn new(delimiter: &str, extensions: &[String], strict: bool) -> Result<Self, Exception> {
        let splitter = Regex::new(&regex::escape(delimiter))
            .map_err(|e| Exception::Config(format!("bad combined delimiter: {}", e)))?;
        Ok(Self {
            delimiter: delimiter.to_string(),
            splitter,
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            strict,
        })
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// 路径中同时包含分隔符和任意一个允许的后缀时，视为合并请求
    pub fn is_combined(&self, path: &str) -> bool {
        if self.delimiter.is_empty() || !path.contains(&self.delimiter) {
            return false;
        }
        let lower = path.to_lowercase();
        self.extensions
            .iter()
            .any(|ext| lower.contains(&format!(".{}", ext)))
    }

    /// 把路径拆成有序的文件列表，返回 (后缀, 相对路径列表)。
    ///
    /// # 错误
    /// - 第一个文件的后缀不被允许：[`Exception::UnsupportedExtension`]
    /// - 后续文件的后缀与第一个不同：[`Exception::MixedExtensions`]
    /// - 某个文件经 `..` 解析后越过根目录：[`Exception::PathOutsideRoot`]
    pub fn split_up(&self, path: &str) -> Result<(String, Vec<String>), Exception> {
        let mut extension: Option<String> = None;
        let mut cwd = String::new();
        let mut pieces = Vec::new();
        for piece in self.splitter.split(path) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let ext = extension_of(piece);
            match &extension {
                None => {
                    if !self.extensions.contains(&ext) {
                        return Err(Exception::UnsupportedExtension(format!(".{}", ext)));
                    }
                    extension = Some(ext);
                }
                Some(expected) if *expected != ext => {
                    return Err(Exception::MixedExtensions {
                        expected: format!(".{}", expected),
                        found: format!(".{}", ext),
                    });
                }
                Some(_) => {}
            }
            let joined = match piece.rfind('/') {
                Some(i) => {
                    cwd = piece[..i].trim_start_matches('/').to_string();
                    piece.trim_start_matches('/').to_string()
                }
                None if cwd.is_empty() => piece.to_string(),
                None => format!("{}/{}", cwd, piece),
            };
            let resolved = resolve_relative(&joined)
                .ok_or_else(|| Exception::PathOutsideRoot(piece.to_string()))?;
            pieces.push(resolved);
        }
        match extension {
            Some(ext) => Ok((ext, pieces)),
            None => Err(Exception::UnsupportedExtension(String::new())),
        }
    }
}

fn extension_of(piece: &str) -> String {
    let name = piece.rsplit('/').next().unwrap_or(piece);
    match name.rfind('.') {
        Some(i) => name[i + 1..].to_lowercase(),
        None => String::new(),
    }
}

/// 按顺序把各个条目的内容写入 `out`，每个条目之后追加 [`ITEM_SEPARATOR`]。
///
/// 单个条目打开或读取失败只会被记录并跳过，不影响其它条目。返回写入的总字节数。
pub fn combine_files<T: Item, W: Write>(items: &[T], out: &mut W) -> io::Result<u64> {
    let mut written = 0u64;
    for item in items {
        let mut stream = match item.open() {
            Ok(s) => s,
            Err(e) => {
                error!("合并时无法打开{}：{}，已跳过", item.absolute_path(), e);
                continue;
            }
        };
        match io::copy(&mut stream, out) {
            Ok(n) => written += n,
            Err(e) => error!("合并时读取{}失败：{}", item.absolute_path(), e),
        }
        out.write_all(&[ITEM_SEPARATOR])?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// 拼接结果：优先放在缓存目录下的临时文件中，否则放在内存里
#[derive(Debug)]
enum Combined {
    Temp(TempPath),
    Memory(Bytes),
}

/// 由若干个同类条目拼接而成的资源
#[derive(Debug, Clone)]
pub struct CombinedResource<T> {
    items: Vec<T>,
    path: String,
    extension: String,
    delimiter: String,
    strict: bool,
    scratch_dir: Option<PathBuf>,
    combined: Arc<OnceLock<Combined>>,
}

impl<T: Item> CombinedResource<T> {
    pub fn new(
        items: Vec<T>,
        path: &str,
        extension: &str,
        rules: &CombineRules,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            items,
            path: path.to_string(),
            extension: extension.to_string(),
            delimiter: rules.delimiter().to_string(),
            strict: rules.strict(),
            scratch_dir,
            combined: Arc::new(OnceLock::new()),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> String {
        self.items
            .iter()
            .map(|i| i.name())
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }

    pub fn absolute_path(&self) -> String {
        self.items
            .iter()
            .map(|i| i.absolute_path())
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }

    /// 严格模式下要求全部条目存在，否则任意一个存在即可
    pub fn exists(&self) -> bool {
        if self.strict {
            !self.items.is_empty() && self.items.iter().all(|i| i.exists())
        } else {
            self.items.iter().any(|i| i.exists())
        }
    }

    pub fn is_readable(&self) -> bool {
        if self.strict {
            !self.items.is_empty() && self.items.iter().all(|i| i.is_readable())
        } else {
            self.items.iter().any(|i| i.is_readable())
        }
    }

    /// 所有条目中最晚的修改时间
    pub fn modified(&self) -> Option<SystemTime> {
        self.items.iter().filter_map(|i| i.modified()).max()
    }

    pub fn etag(&self) -> Option<String> {
        digest_streams(self.items.iter().map(|i| i.open()))
    }

    fn combine(&self) -> &Combined {
        self.combined.get_or_init(|| {
            if let Some(dir) = &self.scratch_dir {
                match self.combine_to_temp(dir) {
                    Ok(temp) => return Combined::Temp(temp),
                    Err(e) => error!("无法在{}中创建合并临时文件：{}，改为在内存中合并", dir.display(), e),
                }
            }
            let mut buf = Vec::new();
            // 写入 Vec 不会失败，单个条目的错误已经在 combine_files 中处理
            let _ = combine_files(&self.items, &mut buf);
            Combined::Memory(Bytes::from(buf))
        })
    }

    fn combine_to_temp(&self, dir: &Path) -> io::Result<TempPath> {
        let mut temp = tempfile::Builder::new()
            .prefix("combine")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        let written = combine_files(&self.items, temp.as_file_mut())?;
        debug!("{}个文件已合并到{}，共{}字节", self.items.len(), temp.path().display(), written);
        Ok(temp.into_temp_path())
    }

    /// 拼接后的长度；无法确定时为 -1
    pub fn len(&self) -> i64 {
        match self.combine() {
            Combined::Temp(path) => fs::metadata(path).map(|m| m.len() as i64).unwrap_or(-1),
            Combined::Memory(bytes) => bytes.len() as i64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self.combine() {
            Combined::Temp(path) => Ok(Box::new(File::open(path)?)),
            Combined::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }
}
