use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

use crate::stats::provider::{ProviderError, StatsProvider};
use crate::stats::snapshot::{FeatureActivity, GuildStats, SectionData, SectionKind, UserStats};

/// 机器人进程上报的实时状态
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveStateReport {
    pub bot_status: Option<String>,
    pub latency_ms: Option<u64>,
    pub guilds: Option<GuildStats>,
    pub users_total: Option<u64>,
    pub users_active: Option<u64>,
    #[serde(default)]
    pub features: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct LiveGauges {
    pub bot_status: Option<String>,
    pub latency_ms: Option<u64>,
    pub guilds: Option<GuildStats>,
    pub users_total: Option<u64>,
    pub users_active: Option<u64>,
    pub features: BTreeMap<String, u64>,
    pub updated_at: Option<Instant>,
}

/// 实时状态缓存，上报的字段覆盖旧值，未上报的字段保留
#[derive(Debug, Default)]
pub struct LiveState {
    gauges: RwLock<LiveGauges>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, report: LiveStateReport) {
        let mut gauges = self.gauges.write().unwrap_or_else(|e| e.into_inner());
        if report.bot_status.is_some() {
            gauges.bot_status = report.bot_status;
        }
        if report.latency_ms.is_some() {
            gauges.latency_ms = report.latency_ms;
        }
        if report.guilds.is_some() {
            gauges.guilds = report.guilds;
        }
        if report.users_total.is_some() {
            gauges.users_total = report.users_total;
            // 新的总数配旧的活跃数没有意义
            gauges.users_active = report.users_active;
        }
        gauges.features.extend(report.features);
        gauges.updated_at = Some(Instant::now());
    }

    pub fn current(&self) -> LiveGauges {
        self.gauges
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// 从实时状态中读取单个分区
///
/// 没有上报过或上报时间超过 `max_age` 时返回错误，由聚合器使用回退值。
pub struct LiveStateProvider {
    live: Arc<LiveState>,
    kind: SectionKind,
    max_age: Duration,
    name: String,
}

impl LiveStateProvider {
    pub fn new(live: Arc<LiveState>, kind: SectionKind, max_age: Duration) -> Self {
        Self {
            live,
            kind,
            max_age,
            name: format!("live_state.{}", kind),
        }
    }
}

#[async_trait]
impl StatsProvider for LiveStateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<SectionData, ProviderError> {
        let gauges = self.live.current();
        match gauges.updated_at {
            Some(at) if at.elapsed() <= self.max_age => {}
            Some(_) => return Err(ProviderError::Unavailable("live state is stale".into())),
            None => return Err(ProviderError::Unavailable("no live state reported".into())),
        }

        let missing = || ProviderError::Unavailable(format!("{} not reported", self.kind));
        match self.kind {
            SectionKind::Guilds => gauges.guilds.map(SectionData::Guilds).ok_or_else(missing),
            SectionKind::Users => {
                let total = gauges.users_total.ok_or_else(missing)?;
                let users = match gauges.users_active {
                    Some(active) => UserStats {
                        total,
                        active,
                        estimated: false,
                    },
                    None => UserStats::estimate(total),
                };
                Ok(SectionData::Users(users))
            }
            SectionKind::Features => Ok(SectionData::Features(FeatureActivity {
                counts: gauges.features,
            })),
            other => Err(ProviderError::Unavailable(format!(
                "live state does not provide {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreported_state_is_unavailable() {
        let live = Arc::new(LiveState::new());
        let provider = LiveStateProvider::new(live, SectionKind::Guilds, Duration::from_secs(60));
        assert!(matches!(provider.collect().await, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn users_without_active_are_estimated() {
        let live = Arc::new(LiveState::new());
        live.update(LiveStateReport {
            users_total: Some(5_000),
            ..Default::default()
        });
        let provider = LiveStateProvider::new(live, SectionKind::Users, Duration::from_secs(60));
        let data = provider.collect().await.unwrap();
        assert_eq!(data, SectionData::Users(UserStats::estimate(5_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_state_is_rejected() {
        let live = Arc::new(LiveState::new());
        live.update(LiveStateReport {
            guilds: Some(GuildStats {
                total: 3,
                ..Default::default()
            }),
            ..Default::default()
        });
        let provider =
            LiveStateProvider::new(live.clone(), SectionKind::Guilds, Duration::from_secs(60));
        assert!(provider.collect().await.is_ok());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(provider.collect().await.is_err());
    }

    #[test]
    fn partial_report_keeps_other_fields() {
        let live = LiveState::new();
        live.update(LiveStateReport {
            bot_status: Some("online".into()),
            latency_ms: Some(42),
            ..Default::default()
        });
        live.update(LiveStateReport {
            features: BTreeMap::from([("economy".to_string(), 9)]),
            ..Default::default()
        });
        let gauges = live.current();
        assert_eq!(gauges.bot_status.as_deref(), Some("online"));
        assert_eq!(gauges.latency_ms, Some(42));
        assert_eq!(gauges.features.get("economy"), Some(&9));
    }
}
