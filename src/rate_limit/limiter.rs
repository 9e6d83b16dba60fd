use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, http::StatusCode};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::keys;
use super::models::{CountPolicy, LimiterStatus, RateLimitDecision, RateLimitEntry};

pub type KeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;
pub type SkipFn = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

type Windows = Arc<DashMap<String, RateLimitEntry>>;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 限流器名称，用于日志和监控
    pub name: String,
    pub window: Duration,
    pub max_requests: u32,
    pub count_policy: CountPolicy,
    /// 拒绝时返回给用户的提示
    pub message: String,
}

impl RateLimitConfig {
    pub fn new(name: impl Into<String>, window: Duration, max_requests: u32) -> Self {
        Self {
            name: name.into(),
            window,
            max_requests,
            count_policy: CountPolicy::All,
            message: "请求过于频繁，请稍后重试".into(),
        }
    }

    pub fn count_policy(mut self, policy: CountPolicy) -> Self {
        self.count_policy = policy;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// 固定窗口限流器
///
/// 准入时不计数；请求结束后由 [`CompletionTicket`] 按响应结果计数一次。
pub struct RateLimiter {
    config: RateLimitConfig,
    key_fn: KeyFn,
    skip: Option<SkipFn>,
    windows: Windows,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("keys", &self.windows.len())
            .finish()
    }
}

/// 准入结果
#[derive(Debug)]
pub enum Admission {
    Allowed {
        decision: RateLimitDecision,
        ticket: CompletionTicket,
    },
    Rejected(RateLimitDecision),
}

impl Admission {
    pub fn decision(&self) -> &RateLimitDecision {
        match self {
            Admission::Allowed { decision, .. } => decision,
            Admission::Rejected(decision) => decision,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            key_fn: Arc::new(keys::ip_and_route),
            skip: None,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn key_for(&self, req: &Request<Body>) -> String {
        (self.key_fn)(req)
    }

    pub fn should_skip(&self, req: &Request<Body>) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(req))
    }

    /// 准入判断
    ///
    /// 窗口不存在或已过期时先换成新窗口（计数归零），再按当前计数判断。
    pub fn admit(&self, key: &str) -> Admission {
        let now = Instant::now();
        let window = self.config.window;
        let max = self.config.max_requests;

        let (count, reset_at) = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| RateLimitEntry::fresh(now, window));
            if !entry.is_current(now) {
                *entry = RateLimitEntry::fresh(now, window);
            }
            (entry.count, entry.window_end)
        };

        if count >= max {
            let decision = RateLimitDecision {
                allowed: false,
                limit: max,
                remaining: 0,
                reset_at,
            };
            tracing::warn!(
                "Rate limit exceeded [{}] key={} limit={} retry_after={}s",
                self.config.name,
                key,
                max,
                decision.retry_after_secs()
            );
            return Admission::Rejected(decision);
        }

        Admission::Allowed {
            decision: RateLimitDecision {
                allowed: true,
                limit: max,
                remaining: max - count - 1,
                reset_at,
            },
            ticket: CompletionTicket {
                windows: self.windows.clone(),
                key: key.to_string(),
                window,
                policy: self.config.count_policy,
                done: false,
            },
        }
    }

    /// 当前窗口（调试和测试用）
    pub fn peek(&self, key: &str) -> Option<RateLimitEntry> {
        self.windows.get(key).map(|entry| *entry)
    }

    pub fn reset(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    pub fn reset_all(&self) {
        self.windows.clear();
    }

    /// 删除已过期超过一个窗口的记录，返回删除数量
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        let mut removed = 0;
        self.windows.retain(|_, entry| {
            let keep = now < entry.window_end + window;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn status(&self) -> LimiterStatus {
        let now = Instant::now();
        let active_keys = self
            .windows
            .iter()
            .filter(|entry| entry.value().is_current(now))
            .count();
        LimiterStatus {
            total_keys: self.windows.len(),
            active_keys,
        }
    }

    /// 启动后台清理任务
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        // 间隔为 0 时按一个窗口清理
        let interval = if interval.is_zero() {
            tracing::warn!(
                "Rate limiter [{}] cleanup interval is 0, using window {:?}",
                self.config.name,
                self.config.window
            );
            self.config.window.max(Duration::from_secs(1))
        } else {
            interval
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Rate limiter [{}] cleanup stopping", self.config.name);
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match catch_unwind(AssertUnwindSafe(|| self.cleanup())) {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(
                                "Rate limiter [{}] cleaned up {} stale windows",
                                self.config.name,
                                removed
                            ),
                            Err(_) => tracing::error!(
                                "限流记录清理失败 [{}]，等待下一轮",
                                self.config.name
                            ),
                        }
                    }
                }
            }
        })
    }
}

/// 请求完成凭证
///
/// `complete` 消耗凭证，只计数一次；未调用就被丢弃时按失败计数。
pub struct CompletionTicket {
    windows: Windows,
    key: String,
    window: Duration,
    policy: CountPolicy,
    done: bool,
}

impl fmt::Debug for CompletionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTicket")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .field("done", &self.done)
            .finish()
    }
}

impl CompletionTicket {
    pub fn complete(mut self, status: StatusCode) {
        self.record(Some(status));
    }

    fn record(&mut self, status: Option<StatusCode>) {
        if self.done {
            return;
        }
        self.done = true;

        if !self.policy.counts(status) {
            return;
        }

        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(self.key.clone())
            .or_insert_with(|| RateLimitEntry::fresh(now, self.window));
        // 过期窗口直接替换，不在旧窗口上累加
        if !entry.is_current(now) {
            *entry = RateLimitEntry::fresh(now, self.window);
        }
        entry.count = entry.count.saturating_add(1);
    }
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        self.record(None);
    }
}
