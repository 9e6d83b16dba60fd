use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// 单个键的固定窗口计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
    pub window_end: Instant,
}

impl RateLimitEntry {
    pub fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_end: now + window,
        }
    }

    /// now < window_end 时窗口仍然有效
    pub fn is_current(&self, now: Instant) -> bool {
        now < self.window_end
    }
}

/// 哪些请求计入额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountPolicy {
    #[default]
    All,
    /// 只统计成功响应（状态码 < 400）
    OnlySuccess,
    /// 只统计失败响应（状态码 >= 400 或请求中途中断）
    OnlyFailure,
}

impl CountPolicy {
    pub fn from_flags(count_only_success: bool, count_only_failure: bool) -> Self {
        match (count_only_success, count_only_failure) {
            (true, false) => CountPolicy::OnlySuccess,
            (false, true) => CountPolicy::OnlyFailure,
            _ => CountPolicy::All,
        }
    }

    /// `None` 表示没有拿到响应（处理器 panic 或客户端断开）
    pub fn counts(&self, status: Option<StatusCode>) -> bool {
        let failed = status.is_none_or(|s| s.as_u16() >= 400);
        match self {
            CountPolicy::All => true,
            CountPolicy::OnlySuccess => !failed,
            CountPolicy::OnlyFailure => failed,
        }
    }
}

/// 一次准入判断的结果
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateLimitDecision {
    pub fn reset_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// ceil((reset_at - now) / 1s)
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_after().as_millis().div_ceil(1000) as u64
    }

    /// 重置时间的墙钟表示，用于 X-RateLimit-Reset
    pub fn reset_at_utc(&self) -> DateTime<Utc> {
        let after = chrono::Duration::from_std(self.reset_after()).unwrap_or_default();
        Utc::now() + after
    }
}

/// 限流拒绝时返回给客户端的数据
#[derive(Debug, Serialize)]
pub struct RateLimitRejection {
    pub limit: u32,
    pub remaining: u32,
    pub reset: DateTime<Utc>,
    pub retry_after_secs: u64,
}

impl From<&RateLimitDecision> for RateLimitRejection {
    fn from(decision: &RateLimitDecision) -> Self {
        Self {
            limit: decision.limit,
            remaining: 0,
            reset: decision.reset_at_utc(),
            retry_after_secs: decision.retry_after_secs(),
        }
    }
}

/// 限流器运行状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LimiterStatus {
    pub total_keys: usize,
    pub active_keys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_flags() {
        assert_eq!(CountPolicy::from_flags(false, false), CountPolicy::All);
        assert_eq!(CountPolicy::from_flags(true, false), CountPolicy::OnlySuccess);
        assert_eq!(CountPolicy::from_flags(false, true), CountPolicy::OnlyFailure);
    }

    #[test]
    fn policy_counts_by_status() {
        let ok = Some(StatusCode::OK);
        let bad = Some(StatusCode::BAD_REQUEST);
        let err = Some(StatusCode::INTERNAL_SERVER_ERROR);

        assert!(CountPolicy::All.counts(ok));
        assert!(CountPolicy::OnlySuccess.counts(ok));
        assert!(!CountPolicy::OnlySuccess.counts(err));
        assert!(!CountPolicy::OnlyFailure.counts(ok));
        assert!(CountPolicy::OnlyFailure.counts(bad));
        assert!(CountPolicy::OnlyFailure.counts(None));
    }
}
