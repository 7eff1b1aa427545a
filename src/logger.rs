// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 写到任意输出流的简单日志后端。
//!
//! 只区分三个级别：`ERROR`（含 WARN）、`INFO`、`DEBUG`（含 TRACE）。
//! 写入失败被直接忽略，日志永远不会中断请求处理。

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct ConsoleLogger {
    level: LevelFilter,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleLogger {
    pub fn new(out: Box<dyn Write + Send>, verbose: bool) -> Self {
        let level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        Self {
            level,
            out: Mutex::new(out),
        }
    }

    pub fn stderr(verbose: bool) -> Self {
        Self::new(Box::new(io::stderr()), verbose)
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// 安装为全局日志后端，每个进程只能成功一次
    pub fn install(self) -> Result<(), SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    fn label(level: Level) -> &'static str {
        match level {
            Level::Error | Level::Warn => "ERROR",
            Level::Info => "INFO",
            Level::Debug | Level::Trace => "DEBUG",
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            Self::label(record.level()),
            record.args()
        );
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }
}
