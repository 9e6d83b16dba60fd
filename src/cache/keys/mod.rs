/// 缓存键模块
/// 提供各种缓存键生成函数以及各类端点的 TTL 预设

// HTTP 请求缓存键
pub mod request_keys;

// 统计快照缓存键
pub mod stats_keys;

use std::time::Duration;

pub use request_keys::{domain_key, request_key};
pub use stats_keys::STATS_SNAPSHOT_KEY;

/// 不同端点的缓存时长，按各自的刷新节奏设置
pub struct CacheTtl;

impl CacheTtl {
    /// 统计类数据，跟随聚合周期
    pub const STATS: Duration = Duration::from_secs(30);
    pub const SHORT: Duration = Duration::from_secs(60);
    pub const MEDIUM: Duration = Duration::from_secs(300);
    pub const LONG: Duration = Duration::from_secs(1800);
    /// 不缓存
    pub const NONE: Duration = Duration::ZERO;
}
