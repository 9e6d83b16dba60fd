use serde::{Deserialize, Serialize};

use crate::{cache::CacheStats, rate_limit::LimiterStatus};

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务器时间
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct LimiterReport {
    pub name: String,
    #[serde(flatten)]
    pub status: LimiterStatus,
}

#[derive(Debug, Serialize)]
pub struct MonitoringReport {
    pub cache: CacheStats,
    pub rate_limiters: Vec<LimiterReport>,
    /// 所有限流器未过期窗口数之和
    pub active_rate_limit_keys: usize,
    /// 从未产生快照时为 null
    pub stats_age_secs: Option<f64>,
    pub aggregator_running: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheQuery {
    pub pattern: Option<String>,
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub cleared: usize,
    pub pattern: Option<String>,
}
