use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::AppState;
use crate::cache::spawn_sweeper;
use crate::stats::StatsAggregator;
use std::sync::Arc;

/// 后台任务：缓存清理、限流记录清理、统计聚合
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    aggregator: Arc<StatsAggregator>,
}

impl BackgroundTasks {
    pub fn start(state: &AppState) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let config = &state.config;

        let mut handles = vec![spawn_sweeper(
            state.cache.clone(),
            config.cache_sweep_interval(),
            rx.clone(),
        )];
        for limiter in state.limiters.all() {
            handles.push(
                limiter
                    .clone()
                    .spawn_cleanup(config.rate_limit_cleanup_interval(), rx.clone()),
            );
        }

        state.aggregator.start(config.stats_interval());

        Self {
            shutdown,
            handles,
            aggregator: state.aggregator.clone(),
        }
    }

    /// 停止所有任务并等待退出，进行中的聚合会先完成
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        if let Some(handle) = self.aggregator.stop() {
            if let Err(e) = handle.await {
                tracing::error!("Stats aggregator task failed: {}", e);
            }
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
        tracing::info!("Background tasks stopped");
    }
}
