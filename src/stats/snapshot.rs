use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 无法查询活跃用户时按总用户数的该比例估算
pub const ACTIVE_USER_RATIO: f64 = 0.1;

/// 快照分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Bot,
    Guilds,
    Users,
    Commands,
    System,
    Features,
}

impl SectionKind {
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Bot,
        SectionKind::Guilds,
        SectionKind::Users,
        SectionKind::Commands,
        SectionKind::System,
        SectionKind::Features,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Bot => "bot",
            SectionKind::Guilds => "guilds",
            SectionKind::Users => "users",
            SectionKind::Commands => "commands",
            SectionKind::System => "system",
            SectionKind::Features => "features",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// 机器人运行状态
///
/// 默认值：status = "unknown"，无延迟数据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub latency_ms: Option<u64>,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self {
            status: "unknown".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            uptime_secs: 0,
            latency_ms: None,
        }
    }
}

/// 服务器数量，默认全 0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildStats {
    pub total: u64,
    pub large: u64,
    pub joined_today: u64,
}

/// 用户数量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total: u64,
    pub active: u64,
    /// active 是否为估算值
    pub estimated: bool,
}

impl UserStats {
    /// 活跃数不可用时按 [`ACTIVE_USER_RATIO`] 估算
    pub fn estimate(total: u64) -> Self {
        Self {
            total,
            active: (total as f64 * ACTIVE_USER_RATIO).round() as u64,
            estimated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCount {
    pub name: String,
    pub count: u64,
}

/// 命令调用统计，默认全 0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStats {
    pub total: u64,
    pub last_hour: u64,
    pub today: u64,
    pub top: Vec<CommandCount>,
}

/// 系统资源，默认全 0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub process_memory_mb: u64,
    pub system_memory_used_mb: u64,
    pub system_memory_total_mb: u64,
    pub cpu_percent: f32,
    pub threads: usize,
}

/// 各功能模块活跃度（economy、tickets、giveaways 等），默认为空
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureActivity {
    pub counts: BTreeMap<String, u64>,
}

/// 数据源返回的单个分区
#[derive(Debug, Clone, PartialEq)]
pub enum SectionData {
    Bot(BotStatus),
    Guilds(GuildStats),
    Users(UserStats),
    Commands(CommandStats),
    System(SystemStats),
    Features(FeatureActivity),
}

impl SectionData {
    pub fn kind(&self) -> SectionKind {
        match self {
            SectionData::Bot(_) => SectionKind::Bot,
            SectionData::Guilds(_) => SectionKind::Guilds,
            SectionData::Users(_) => SectionKind::Users,
            SectionData::Commands(_) => SectionKind::Commands,
            SectionData::System(_) => SectionKind::System,
            SectionData::Features(_) => SectionKind::Features,
        }
    }
}

/// 一次聚合产生的完整快照，发布后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
    pub collection_ms: u64,
    /// 使用了回退值的分区
    pub degraded: Vec<SectionKind>,
    pub bot: BotStatus,
    pub guilds: GuildStats,
    pub users: UserStats,
    pub commands: CommandStats,
    pub system: SystemStats,
    pub features: FeatureActivity,
}

impl Serialize for SectionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl StatsSnapshot {
    pub fn section_json(&self, kind: SectionKind) -> serde_json::Value {
        let value = match kind {
            SectionKind::Bot => serde_json::to_value(&self.bot),
            SectionKind::Guilds => serde_json::to_value(&self.guilds),
            SectionKind::Users => serde_json::to_value(&self.users),
            SectionKind::Commands => serde_json::to_value(&self.commands),
            SectionKind::System => serde_json::to_value(&self.system),
            SectionKind::Features => serde_json::to_value(&self.features),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn is_degraded(&self, kind: SectionKind) -> bool {
        self.degraded.contains(&kind)
    }
}

/// 已发布的快照以及产生时间
#[derive(Debug, Clone)]
pub struct PublishedSnapshot {
    pub snapshot: Arc<StatsSnapshot>,
    pub produced_at: Instant,
}

impl PublishedSnapshot {
    pub fn new(snapshot: Arc<StatsSnapshot>) -> Self {
        Self {
            snapshot,
            produced_at: Instant::now(),
        }
    }
}

/// 汇总各数据源结果，缺失的分区用回退值补齐
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    bot: Option<BotStatus>,
    guilds: Option<GuildStats>,
    users: Option<UserStats>,
    commands: Option<CommandStats>,
    system: Option<SystemStats>,
    features: Option<FeatureActivity>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一分区多次写入时后者覆盖前者，功能活跃度按键合并
    pub fn apply(&mut self, data: SectionData) {
        match data {
            SectionData::Bot(bot) => self.bot = Some(bot),
            SectionData::Guilds(guilds) => self.guilds = Some(guilds),
            SectionData::Users(users) => self.users = Some(users),
            SectionData::Commands(commands) => self.commands = Some(commands),
            SectionData::System(system) => self.system = Some(system),
            SectionData::Features(features) => match &mut self.features {
                Some(existing) => existing.counts.extend(features.counts),
                None => self.features = Some(features),
            },
        }
    }

    /// 回退规则：沿用上一份快照的对应分区（用户分区标记为估算），没有上一份时使用默认值
    pub fn build(
        self,
        generation: u64,
        generated_at: DateTime<Utc>,
        collection_ms: u64,
        previous: Option<&StatsSnapshot>,
    ) -> StatsSnapshot {
        let mut degraded = Vec::new();

        fn pick<T: Clone + Default>(
            value: Option<T>,
            kind: SectionKind,
            previous: Option<&T>,
            degraded: &mut Vec<SectionKind>,
        ) -> T {
            value.unwrap_or_else(|| {
                degraded.push(kind);
                previous.cloned().unwrap_or_default()
            })
        }

        let bot = pick(self.bot, SectionKind::Bot, previous.map(|p| &p.bot), &mut degraded);
        let guilds = pick(
            self.guilds,
            SectionKind::Guilds,
            previous.map(|p| &p.guilds),
            &mut degraded,
        );
        let users = match self.users {
            Some(users) => users,
            None => {
                degraded.push(SectionKind::Users);
                previous
                    .map(|p| UserStats::estimate(p.users.total))
                    .unwrap_or_default()
            }
        };
        let commands = pick(
            self.commands,
            SectionKind::Commands,
            previous.map(|p| &p.commands),
            &mut degraded,
        );
        let system = pick(
            self.system,
            SectionKind::System,
            previous.map(|p| &p.system),
            &mut degraded,
        );
        let features = pick(
            self.features,
            SectionKind::Features,
            previous.map(|p| &p.features),
            &mut degraded,
        );

        StatsSnapshot {
            generation,
            generated_at,
            collection_ms,
            degraded,
            bot,
            guilds,
            users,
            commands,
            system,
            features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut builder = SnapshotBuilder::new();
        builder.apply(SectionData::Guilds(GuildStats {
            total: 12,
            large: 1,
            joined_today: 2,
        }));

        let snapshot = builder.build(1, Utc::now(), 5, None);
        assert_eq!(snapshot.guilds.total, 12);
        assert_eq!(snapshot.users, UserStats::default());
        assert_eq!(snapshot.bot.status, "unknown");
        assert!(!snapshot.is_degraded(SectionKind::Guilds));
        assert_eq!(snapshot.degraded.len(), 5);
    }

    #[test]
    fn previous_values_carry_over_and_users_are_estimated() {
        let mut first = SnapshotBuilder::new();
        first.apply(SectionData::Users(UserStats {
            total: 1_000,
            active: 400,
            estimated: false,
        }));
        let previous = first.build(1, Utc::now(), 1, None);

        let second = SnapshotBuilder::new().build(2, Utc::now(), 1, Some(&previous));
        assert_eq!(second.users, UserStats::estimate(1_000));
        assert_eq!(second.users.active, 100);
        assert!(second.is_degraded(SectionKind::Users));
    }

    #[test]
    fn feature_sections_merge() {
        let mut builder = SnapshotBuilder::new();
        builder.apply(SectionData::Features(FeatureActivity {
            counts: BTreeMap::from([("economy".to_string(), 3)]),
        }));
        builder.apply(SectionData::Features(FeatureActivity {
            counts: BTreeMap::from([("tickets".to_string(), 4)]),
        }));
        let snapshot = builder.build(1, Utc::now(), 0, None);
        assert_eq!(snapshot.features.counts.len(), 2);
    }

    #[test]
    fn section_kind_parses_case_insensitively() {
        assert_eq!("Guilds".parse::<SectionKind>(), Ok(SectionKind::Guilds));
        assert!("economy".parse::<SectionKind>().is_err());
    }
}
