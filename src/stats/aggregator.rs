use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::counters::CommandCounters;
use super::provider::{ProviderError, StatsProvider};
use super::snapshot::{PublishedSnapshot, SectionData, SnapshotBuilder, StatsSnapshot};
use crate::cache::keys::STATS_SNAPSHOT_KEY;
use crate::cache::{CacheStore, CacheValue};

/// 定时聚合触发时上一次聚合仍未结束的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// 跳过本次并记录日志
    #[default]
    Skip,
    /// 等上一次结束后再执行
    Queue,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "queue" => Ok(OverlapPolicy::Queue),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// 单个数据源的超时
    pub provider_timeout: Duration,
    /// 快照写入缓存时的 TTL
    pub snapshot_ttl: Duration,
    pub overlap: OverlapPolicy,
    /// 聚合耗时超过间隔的该比例时告警
    pub slow_tick_ratio: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(30),
            overlap: OverlapPolicy::Skip,
            slow_tick_ratio: 0.5,
        }
    }
}

struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 统计聚合器
///
/// 定时并发调用所有数据源，合成完整快照后整体替换当前快照，并镜像写入缓存。
/// 同一时间最多只有一轮数据源调用在进行。
pub struct StatsAggregator {
    config: AggregatorConfig,
    cache: Arc<CacheStore>,
    counters: Arc<CommandCounters>,
    providers: RwLock<Vec<Arc<dyn StatsProvider>>>,
    current: RwLock<Option<PublishedSnapshot>>,
    generation: AtomicU64,
    in_flight: tokio::sync::Mutex<()>,
    interval_ms: AtomicU64,
    runner: Mutex<Option<Runner>>,
}

impl StatsAggregator {
    pub fn new(config: AggregatorConfig, cache: Arc<CacheStore>) -> Self {
        Self::with_counters(config, cache, Arc::new(CommandCounters::new()))
    }

    pub fn with_counters(
        config: AggregatorConfig,
        cache: Arc<CacheStore>,
        counters: Arc<CommandCounters>,
    ) -> Self {
        Self {
            config,
            cache,
            counters,
            providers: RwLock::new(Vec::new()),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            in_flight: tokio::sync::Mutex::new(()),
            interval_ms: AtomicU64::new(0),
            runner: Mutex::new(None),
        }
    }

    pub fn register(&self, provider: Arc<dyn StatsProvider>) {
        tracing::debug!("Registered stats provider: {}", provider.name());
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(provider);
    }

    pub fn counters(&self) -> Arc<CommandCounters> {
        self.counters.clone()
    }

    pub fn increment_command(&self, name: &str) {
        self.counters.increment(name);
    }

    /// 启动定时聚合，第一轮立即执行；已在运行时或间隔为 0 时忽略
    pub fn start(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            tracing::error!("Stats aggregation interval must be greater than 0, not starting");
            return;
        }
        let mut runner = self.runner.lock().unwrap_or_else(|e| e.into_inner());
        if runner.is_some() {
            tracing::warn!("Stats aggregator already running");
            return;
        }
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);

        let (tx, mut rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        // 这里不再监听停止信号，进行中的一轮会完成并发布
                        this.scheduled_tick().await;
                    }
                }
            }
            tracing::info!("Stats aggregator stopped");
        });

        tracing::info!("Stats aggregator started, interval {:?}", interval);
        *runner = Some(Runner {
            shutdown: tx,
            handle,
        });
    }

    /// 停止定时聚合，可重复调用
    ///
    /// 返回后台任务句柄，调用方可以等待进行中的一轮结束。
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let runner = self
            .runner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let _ = runner.shutdown.send(true);
        Some(runner.handle)
    }

    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    async fn scheduled_tick(&self) -> Option<Arc<StatsSnapshot>> {
        let _guard = match self.config.overlap {
            OverlapPolicy::Skip => match self.in_flight.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!("Stats aggregation still in flight, skipping tick");
                    return None;
                }
            },
            OverlapPolicy::Queue => self.in_flight.lock().await,
        };
        Some(self.run_cycle().await)
    }

    /// 立即聚合一轮并返回结果
    ///
    /// 如果已有一轮在进行，等它结束并直接返回它的结果，不再发起新一轮。
    pub async fn refresh(&self) -> Arc<StatsSnapshot> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.in_flight.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(published) = self.current_published() {
                return published.snapshot;
            }
        }
        self.run_cycle().await
    }

    /// 必须在持有 in_flight 锁时调用
    async fn run_cycle(&self) -> Arc<StatsSnapshot> {
        let started = Instant::now();
        let providers: Vec<Arc<dyn StatsProvider>> = self
            .providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let timeout = self.config.provider_timeout;
        let results = join_all(providers.iter().map(|provider| async move {
            (provider.name().to_string(), collect_one(provider.as_ref(), timeout).await)
        }))
        .await;

        let mut builder = SnapshotBuilder::new();
        for (name, result) in results {
            match result {
                Ok(section) => builder.apply(section),
                Err(e) => {
                    tracing::debug!("Stats provider {} failed, using fallback: {}", name, e)
                }
            }
        }

        let previous = self.current_published();
        let generation = previous
            .as_ref()
            .map(|p| p.snapshot.generation)
            .unwrap_or(0)
            + 1;
        let elapsed = started.elapsed();
        let snapshot = Arc::new(builder.build(
            generation,
            Utc::now(),
            elapsed.as_millis() as u64,
            previous.as_ref().map(|p| p.snapshot.as_ref()),
        ));

        self.publish(PublishedSnapshot::new(snapshot.clone()));
        self.warn_if_slow(elapsed);
        snapshot
    }

    fn publish(&self, published: PublishedSnapshot) {
        let generation = published.snapshot.generation;
        self.cache.set(
            STATS_SNAPSHOT_KEY,
            CacheValue::Stats(published.clone()),
            self.config.snapshot_ttl,
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(published);
        self.generation.store(generation, Ordering::Release);
    }

    fn warn_if_slow(&self, elapsed: Duration) {
        let interval_ms = self.interval_ms.load(Ordering::Relaxed);
        if interval_ms == 0 {
            return;
        }
        let threshold =
            Duration::from_millis((interval_ms as f64 * self.config.slow_tick_ratio) as u64);
        if elapsed > threshold {
            tracing::warn!(
                "Stats aggregation took {:?}, above threshold {:?}",
                elapsed,
                threshold
            );
        }
    }

    /// 内存中的快照与缓存中的副本取较新的一份
    fn current_published(&self) -> Option<PublishedSnapshot> {
        let in_memory = self
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        // 内部读取不计入缓存命中率
        let cached = self
            .cache
            .peek(STATS_SNAPSHOT_KEY)
            .and_then(CacheValue::into_stats);

        match (in_memory, cached) {
            (Some(memory), Some(cached)) => {
                if cached.produced_at > memory.produced_at {
                    Some(cached)
                } else {
                    Some(memory)
                }
            }
            (memory, cached) => memory.or(cached),
        }
    }

    pub fn get_stats(&self) -> Option<Arc<StatsSnapshot>> {
        self.current_published().map(|p| p.snapshot)
    }

    /// 当前快照的年龄，从未产生过快照时为 None
    pub fn stats_age(&self) -> Option<Duration> {
        self.current_published().map(|p| p.produced_at.elapsed())
    }

    /// 快照不存在或超过 `max_age` 时强制刷新
    pub async fn get_fresh(&self, max_age: Duration) -> Arc<StatsSnapshot> {
        if let Some(published) = self.current_published() {
            if published.produced_at.elapsed() <= max_age {
                return published.snapshot;
            }
        }
        self.refresh().await
    }
}

async fn collect_one(
    provider: &dyn StatsProvider,
    timeout: Duration,
) -> Result<SectionData, ProviderError> {
    let call = AssertUnwindSafe(provider.collect()).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ProviderError::Panicked),
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::provider::{async_provider, sync_provider};
    use crate::stats::snapshot::{FeatureActivity, GuildStats, SectionKind, UserStats};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn aggregator(config: AggregatorConfig) -> Arc<StatsAggregator> {
        Arc::new(StatsAggregator::new(config, Arc::new(CacheStore::new())))
    }

    fn guilds(total: u64) -> SectionData {
        SectionData::Guilds(GuildStats {
            total,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn failing_provider_only_affects_its_section() {
        let agg = aggregator(AggregatorConfig::default());
        agg.register(sync_provider("guilds", || Ok(guilds(7))));
        agg.register(sync_provider("users", || {
            Err(ProviderError::Unavailable("database down".into()))
        }));
        agg.register(async_provider("features", || async {
            Ok(SectionData::Features(FeatureActivity {
                counts: BTreeMap::from([("economy".to_string(), 5)]),
            }))
        }));

        let snapshot = agg.refresh().await;
        assert_eq!(snapshot.guilds.total, 7);
        assert_eq!(snapshot.features.counts.get("economy"), Some(&5));
        assert_eq!(snapshot.users, UserStats::default());
        assert!(snapshot.is_degraded(SectionKind::Users));
        assert!(!snapshot.is_degraded(SectionKind::Guilds));
    }

    #[tokio::test]
    async fn panicking_provider_is_contained() {
        let agg = aggregator(AggregatorConfig::default());
        agg.register(sync_provider("boom", || panic!("provider bug")));
        agg.register(sync_provider("guilds", || Ok(guilds(3))));

        let snapshot = agg.refresh().await;
        assert_eq!(snapshot.guilds.total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let agg = aggregator(AggregatorConfig {
            provider_timeout: Duration::from_secs(1),
            ..Default::default()
        });
        agg.register(async_provider("slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(guilds(99))
        }));

        let snapshot = agg.refresh().await;
        assert!(snapshot.is_degraded(SectionKind::Guilds));
        assert_eq!(snapshot.guilds.total, 0);
    }

    #[tokio::test]
    async fn refresh_publishes_into_cache() {
        let cache = Arc::new(CacheStore::new());
        let agg = StatsAggregator::new(AggregatorConfig::default(), cache.clone());
        assert!(agg.get_stats().is_none());
        assert!(agg.stats_age().is_none());

        let snapshot = agg.refresh().await;
        let cached = cache
            .get(STATS_SNAPSHOT_KEY)
            .and_then(CacheValue::into_stats)
            .expect("snapshot mirrored into cache");
        assert_eq!(cached.snapshot.generation, snapshot.generation);
        assert_eq!(agg.get_stats().map(|s| s.generation), Some(1));
    }

    #[tokio::test]
    async fn snapshot_reads_do_not_touch_cache_stats() {
        let cache = Arc::new(CacheStore::new());
        let agg = StatsAggregator::new(AggregatorConfig::default(), cache.clone());
        agg.refresh().await;
        agg.refresh().await;

        for _ in 0..10 {
            assert!(agg.stats_age().is_some());
            assert!(agg.get_stats().is_some());
        }
        agg.get_fresh(Duration::from_secs(60)).await;

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[tokio::test]
    async fn command_counters_are_read_not_reset() {
        let agg = aggregator(AggregatorConfig::default());
        agg.register(Arc::new(crate::stats::sources::CommandsProvider::new(
            agg.counters(),
            5,
        )));
        agg.increment_command("balance");
        agg.increment_command("balance");

        assert_eq!(agg.refresh().await.commands.total, 2);
        agg.increment_command("rank");
        assert_eq!(agg.refresh().await.commands.total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refresh_shares_in_flight_cycle() {
        let (agg, calls) = slow_counting(AggregatorConfig::default());

        let (a, b) = tokio::join!(agg.refresh(), agg.refresh());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.generation, b.generation);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_tick_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let agg = aggregator(AggregatorConfig::default());
        let counter = calls.clone();
        agg.register(async_provider("slow", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(guilds(1))
            }
        }));

        // 间隔 100ms，单轮耗时 250ms
        agg.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let handle = agg.stop().expect("running");
        handle.await.unwrap();

        // 不跳过的话会是 10 轮
        let total = calls.load(Ordering::SeqCst);
        assert!(total <= 4, "expected skipped ticks, got {} cycles", total);
        assert!(agg.stop().is_none());
    }

    fn slow_counting(config: AggregatorConfig) -> (Arc<StatsAggregator>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let agg = aggregator(config);
        let counter = calls.clone();
        agg.register(async_provider("slow", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(guilds(1))
            }
        }));
        (agg, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_tick_skips_while_refresh_in_flight() {
        let (agg, calls) = slow_counting(AggregatorConfig::default());

        let (refreshed, ticked) = tokio::join!(agg.refresh(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            agg.scheduled_tick().await
        });
        assert_eq!(refreshed.generation, 1);
        assert!(ticked.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_tick_runs_after_in_flight_cycle() {
        let (agg, calls) = slow_counting(AggregatorConfig {
            overlap: OverlapPolicy::Queue,
            ..Default::default()
        });

        let (_, ticked) = tokio::join!(agg.refresh(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            agg.scheduled_tick().await
        });
        assert_eq!(ticked.map(|s| s.generation), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn overlap_policy_parses() {
        assert_eq!("Skip".parse::<OverlapPolicy>(), Ok(OverlapPolicy::Skip));
        assert_eq!(" queue ".parse::<OverlapPolicy>(), Ok(OverlapPolicy::Queue));
        assert!("merge".parse::<OverlapPolicy>().is_err());
    }

    #[tokio::test]
    async fn zero_interval_is_refused() {
        let agg = aggregator(AggregatorConfig::default());
        agg.start(Duration::ZERO);
        assert!(!agg.is_running());
        assert!(agg.stop().is_none());

        // 手动刷新仍然可用
        assert_eq!(agg.refresh().await.generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_tick_publish() {
        let agg = aggregator(AggregatorConfig::default());
        agg.register(async_provider("slow", || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(guilds(42))
        }));

        agg.start(Duration::from_secs(30));
        // 第一轮已经开始
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(agg.get_stats().is_none());

        let handle = agg.stop().expect("running");
        handle.await.unwrap();
        assert_eq!(agg.get_stats().map(|s| s.guilds.total), Some(42));
        assert!(!agg.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn get_fresh_refreshes_stale_snapshot() {
        let agg = aggregator(AggregatorConfig::default());
        let first = agg.get_fresh(Duration::from_secs(60)).await;
        assert_eq!(first.generation, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(agg.get_fresh(Duration::from_secs(60)).await.generation, 1);
        assert_eq!(agg.stats_age(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(agg.get_fresh(Duration::from_secs(60)).await.generation, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_partial_snapshots() {
        let round = Arc::new(AtomicU64::new(0));
        let agg = aggregator(AggregatorConfig::default());

        let r = round.clone();
        agg.register(async_provider("guilds", move || {
            let value = r.load(Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                Ok(guilds(value))
            }
        }));
        let r = round.clone();
        agg.register(async_provider("users", move || {
            let value = r.load(Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                Ok(SectionData::Users(UserStats {
                    total: value,
                    active: value,
                    estimated: false,
                }))
            }
        }));

        let writer = {
            let agg = agg.clone();
            let round = round.clone();
            tokio::spawn(async move {
                for i in 1..=200 {
                    round.store(i, Ordering::SeqCst);
                    agg.refresh().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let agg = agg.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        if let Some(snapshot) = agg.get_stats() {
                            assert_eq!(snapshot.guilds.total, snapshot.users.total);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
