/// 缓存数据模型
/// 定义缓存条目、缓存值以及统计结构
pub mod entry;
pub mod pattern;
pub mod stats;

// 重新导出常用类型
pub use entry::{CacheEntry, CacheValue, CachedResponse};
pub use pattern::KeyPattern;
pub use stats::CacheStats;
