use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::models::{CacheEntry, CacheStats, CacheValue, KeyPattern};

/// 进程内 TTL 缓存
///
/// 条目按键分片存放在 `DashMap` 中，命中/未命中计数使用原子量。
/// 同一个键上的读写保证看到最近一次完成的写入，不同键之间没有顺序保证。
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取缓存值
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.get_with_ttl(key).map(|(value, _)| value)
    }

    /// 读取缓存值以及剩余 TTL
    ///
    /// 过期但尚未被清理的条目会在这里被移除，然后按未命中处理。
    pub fn get_with_ttl(&self, key: &str) -> Option<(CacheValue, Duration)> {
        let now = Instant::now();

        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_live(now) {
                entry.hit_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some((entry.value.clone(), entry.remaining_ttl(now)));
            }
            // 必须先释放分片锁再删除
            drop(entry);
            // 只删仍然过期的条目，避免误删并发写入的新值
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 读取缓存值，不计入命中统计，也不移除过期条目
    pub fn peek(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// 写入缓存值，TTL 为 0 时不缓存并丢弃旧值
    pub fn set(&self, key: impl Into<String>, value: impl Into<CacheValue>, ttl: Duration) {
        let key = key.into();
        if ttl.is_zero() {
            self.entries.remove(&key);
            return;
        }
        self.entries
            .insert(key, CacheEntry::new(value.into(), ttl, Instant::now()));
    }

    /// 读穿透：命中直接返回，否则调用 loader 并写回缓存
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<CacheValue, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = loader().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// 删除所有匹配的键，返回删除数量
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if pattern.matches(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            tracing::debug!("Invalidated {} cache entries matching {:?}", removed, pattern);
        }
        removed
    }

    /// 物理删除所有过期条目，返回删除数量
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.entries.len(),
        )
    }

    /// 当前有效的键（监控用）
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// 某个键累计命中次数
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.hit_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
