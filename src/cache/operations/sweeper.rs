use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::CacheStore;

/// 间隔为 0 时使用的最小间隔
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// 启动后台清理任务，按固定间隔物理删除过期条目
///
/// 单次清理失败只记录日志，不影响后续清理。`shutdown` 变为 true 时退出。
pub fn spawn_sweeper(
    cache: Arc<CacheStore>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_sweep_loop(interval, shutdown, move || cache.sweep())
}

fn spawn_sweep_loop<F>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    let interval = if interval.is_zero() {
        tracing::warn!("Cache sweep interval is 0, using {:?}", MIN_SWEEP_INTERVAL);
        MIN_SWEEP_INTERVAL
    } else {
        interval
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回，跳过
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Cache sweeper stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match catch_unwind(AssertUnwindSafe(&sweep)) {
                        Ok(0) => {}
                        Ok(removed) => {
                            tracing::debug!("Cache sweep removed {} expired entries", removed);
                        }
                        Err(_) => {
                            tracing::error!("缓存清理失败，等待下一轮");
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_unread_entries() {
        let cache = Arc::new(CacheStore::new());
        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(30), rx);

        cache.set("one-shot", json!(1), Duration::from_secs(5));
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(cache.len(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_does_not_stop_later_sweeps() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweep_loop(Duration::from_secs(10), rx, move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("sweep failed");
            }
            0
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_sweeps() {
        let cache = Arc::new(CacheStore::new());
        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(cache.clone(), Duration::ZERO, rx);

        cache.set("k", json!(1), Duration::from_millis(500));
        tokio::time::sleep(MIN_SWEEP_INTERVAL + Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);

        tx.send(true).unwrap();
        assert!(handle.await.is_ok());
    }
}
