use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use super::live_state::LiveState;
use crate::stats::provider::{ProviderError, StatsProvider};
use crate::stats::snapshot::{BotStatus, SectionData};

/// 运行状态：本进程运行时长、版本，以及机器人上报的在线状态和延迟
pub struct RuntimeProvider {
    started_at: Instant,
    live: Arc<LiveState>,
}

impl RuntimeProvider {
    pub fn new(live: Arc<LiveState>) -> Self {
        Self {
            started_at: Instant::now(),
            live,
        }
    }
}

#[async_trait]
impl StatsProvider for RuntimeProvider {
    fn name(&self) -> &str {
        "runtime"
    }

    async fn collect(&self) -> Result<SectionData, ProviderError> {
        let gauges = self.live.current();
        Ok(SectionData::Bot(BotStatus {
            status: gauges.bot_status.unwrap_or_else(|| "unknown".into()),
            version: env!("CARGO_PKG_VERSION").into(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            latency_ms: gauges.latency_ms,
        }))
    }
}
