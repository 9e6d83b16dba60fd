use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::stats::counters::CommandCounters;
use crate::stats::provider::{ProviderError, StatsProvider};
use crate::stats::snapshot::SectionData;

/// 读取本地命令计数
pub struct CommandsProvider {
    counters: Arc<CommandCounters>,
    top_n: usize,
}

impl CommandsProvider {
    pub fn new(counters: Arc<CommandCounters>, top_n: usize) -> Self {
        Self { counters, top_n }
    }
}

#[async_trait]
impl StatsProvider for CommandsProvider {
    fn name(&self) -> &str {
        "commands"
    }

    async fn collect(&self) -> Result<SectionData, ProviderError> {
        self.counters.roll_over(Utc::now());
        Ok(SectionData::Commands(self.counters.snapshot(self.top_n)))
    }
}
