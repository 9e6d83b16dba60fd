/// 聚合器发布快照使用的固定键
pub const STATS_SNAPSHOT_KEY: &str = "stats:snapshot";
