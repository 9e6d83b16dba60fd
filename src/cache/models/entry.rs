use axum::body::Bytes;
use serde_json::Value;
use tokio::time::Instant;
use std::time::Duration;

use crate::stats::PublishedSnapshot;

/// 缓存的 HTTP 响应体
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// 缓存值，调用方拿到的永远是拷贝
#[derive(Debug, Clone)]
pub enum CacheValue {
    Json(Value),
    Response(CachedResponse),
    Stats(PublishedSnapshot),
}

impl CacheValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<CachedResponse> {
        match self {
            CacheValue::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_stats(self) -> Option<PublishedSnapshot> {
        match self {
            CacheValue::Stats(published) => Some(published),
            _ => None,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::Json(value)
    }
}

/// 缓存条目，只在缓存内部持有
#[derive(Debug)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(value: CacheValue, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            stored_at: now,
            ttl,
            hit_count: 0,
        }
    }

    /// now - stored_at < ttl 时有效
    pub fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.stored_at))
    }
}
