// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 有序多值映射
//!
//! 请求头、GET 参数和 POST 参数共用的值语义容器：
//! - 保留插入顺序，同一个键可以对应多个值。
//! - 键的查找不区分大小写。
//! - 实现了 `Clone`，复制出来的实例与原实例互不影响。

/// 有序、多值、键不区分大小写的映射表。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// 在键已有的值列表末尾追加一个值
    pub fn add(&mut self, key: &str, value: &str) {
        match self.position(key) {
            Some(i) => self.entries[i].1.push(value.to_string()),
            None => self
                .entries
                .push((key.to_string(), vec![value.to_string()])),
        }
    }

    /// 用单个值替换键原有的全部值
    pub fn set(&mut self, key: &str, value: &str) {
        match self.position(key) {
            Some(i) => self.entries[i].1 = vec![value.to_string()],
            None => self
                .entries
                .push((key.to_string(), vec![value.to_string()])),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(|s| s.as_str())
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        match self.position(key) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// 判断某个键的任意一个值是否（不区分大小写地）包含给定片段
    pub fn any_value_contains(&self, key: &str, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.get_all(key)
            .iter()
            .any(|v| v.to_lowercase().contains(&needle))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 按插入顺序遍历 (键, 值) 对，多值键会展开为多项
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}
