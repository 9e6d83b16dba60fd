use std::sync::Arc;

use cache::CacheStore;
use config::Config;
use rate_limit::{CountPolicy, RateLimitConfig, RateLimiter, keys};
use stats::{
    AggregatorConfig, SectionKind, StatsAggregator,
    sources::{CommandsProvider, LiveState, LiveStateProvider, RuntimeProvider, SystemProvider},
};

pub mod background;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod routes;
pub mod stats;
pub mod utils;

/// 排行榜中展示的命令数量
const TOP_COMMANDS: usize = 10;

#[derive(Clone)]
pub struct RateLimiters {
    /// 所有 API 路由共用
    pub api: Arc<RateLimiter>,
    /// 写操作和监控路由额外使用
    pub strict: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn all(&self) -> [&Arc<RateLimiter>; 2] {
        [&self.api, &self.strict]
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub cache: Arc<CacheStore>,
    pub limiters: RateLimiters,
    pub aggregator: Arc<StatsAggregator>,
    pub live_state: Arc<LiveState>,
}

impl AppState {
    /// 进程启动时构建一次，之后通过路由状态传递
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(CacheStore::new());

        let api = RateLimiter::new(
            RateLimitConfig::new("api", config.rate_limit_window(), config.rate_limit_requests)
                .count_policy(CountPolicy::from_flags(
                    config.rate_limit_count_only_success,
                    config.rate_limit_count_only_failure,
                )),
        )
        .with_skip(|req| req.uri().path().ends_with("/health"));

        let strict = RateLimiter::new(
            RateLimitConfig::new(
                "strict",
                config.strict_rate_limit_window(),
                config.strict_rate_limit_requests,
            )
            .message("操作过于频繁"),
        )
        .with_key_fn(keys::user_or_ip);

        let aggregator = Arc::new(StatsAggregator::new(
            AggregatorConfig {
                provider_timeout: config.stats_provider_timeout(),
                snapshot_ttl: config.stats_cache_ttl(),
                overlap: config.stats_overlap_policy,
                ..Default::default()
            },
            cache.clone(),
        ));

        let live_state = Arc::new(LiveState::new());
        aggregator.register(Arc::new(RuntimeProvider::new(live_state.clone())));
        for kind in [SectionKind::Guilds, SectionKind::Users, SectionKind::Features] {
            aggregator.register(Arc::new(LiveStateProvider::new(
                live_state.clone(),
                kind,
                config.live_state_max_age(),
            )));
        }
        aggregator.register(Arc::new(CommandsProvider::new(
            aggregator.counters(),
            TOP_COMMANDS,
        )));
        aggregator.register(Arc::new(SystemProvider::new()));

        Self {
            config,
            cache,
            limiters: RateLimiters {
                api: Arc::new(api),
                strict: Arc::new(strict),
            },
            aggregator,
            live_state,
        }
    }
}
