// 限流模块
// 固定窗口计数、键策略以及请求完成后的延迟计数

pub mod keys;
pub mod limiter;
pub mod models;

pub use limiter::{Admission, CompletionTicket, RateLimitConfig, RateLimiter};
pub use models::{CountPolicy, LimiterStatus, RateLimitDecision, RateLimitEntry, RateLimitRejection};
