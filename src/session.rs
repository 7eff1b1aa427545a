// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 会话变量
//!
//! 供简单的 Web 应用在多次请求之间保存状态：会话号由递增序列分配，
//! 每个会话是一张变量名 → 值的映射表。会话管理器由 [`crate::ServerContext`] 持有，
//! 处理器通过 `request.context().sessions()` 访问。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::debug;

type Variables = HashMap<String, String>;

#[derive(Debug, Default)]
pub struct SessionManager {
    sequence: AtomicU64,
    sessions: Mutex<HashMap<u64, Variables>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个可用的会话号
    pub fn next_session_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, Variables>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 设置会话变量，会话不存在时自动创建
    pub fn set_variable(&self, session: u64, name: &str, value: impl ToString) {
        self.sessions()
            .entry(session)
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    pub fn variable(&self, session: u64, name: &str) -> Option<String> {
        self.sessions().get(&session)?.get(name).cloned()
    }

    /// 删除会话变量并返回它原来的值
    pub fn remove_variable(&self, session: u64, name: &str) -> Option<String> {
        self.sessions().get_mut(&session)?.remove(name)
    }

    /// 删除整个会话，返回会话是否存在
    pub fn clear_session(&self, session: u64) -> bool {
        let removed = self.sessions().remove(&session);
        if let Some(vars) = &removed {
            debug!("会话{}已删除，包含{}个变量", session, vars.len());
        }
        removed.is_some()
    }

    /// 当前的会话数
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}
