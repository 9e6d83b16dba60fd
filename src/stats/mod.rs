//! 统计聚合
//!
//! 定时从多个数据源拉取数据，合成不可变快照并发布到缓存。

pub mod aggregator;
pub mod counters;
pub mod provider;
pub mod snapshot;
pub mod sources;

pub use aggregator::{AggregatorConfig, OverlapPolicy, StatsAggregator};
pub use counters::CommandCounters;
pub use provider::{ProviderError, StatsProvider, async_provider, sync_provider};
pub use snapshot::{
    BotStatus, CommandCount, CommandStats, FeatureActivity, GuildStats, PublishedSnapshot,
    SectionData, SectionKind, StatsSnapshot, SystemStats, UserStats,
};
