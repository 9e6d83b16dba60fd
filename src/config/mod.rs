use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheTtl;
use crate::stats::OverlapPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub cache_sweep_interval_secs: u64,
    pub stats_cache_ttl_secs: u64,
    pub stats_interval_secs: u64,
    pub stats_freshness_secs: u64,
    pub stats_provider_timeout_secs: u64,
    pub stats_overlap_policy: OverlapPolicy,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_count_only_success: bool,
    pub rate_limit_count_only_failure: bool,
    pub strict_rate_limit_window_secs: u64,
    pub strict_rate_limit_requests: u32,
    pub rate_limit_cleanup_interval_secs: u64,
    pub live_state_max_age_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("STATS_OVERLAP_POLICY 无效: {0} (可选 skip/queue)")]
    InvalidOverlapPolicy(String),
}

// 读取环境变量，缺失或无法解析时使用默认值
fn var_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

// 间隔和窗口不能为 0，否则定时任务无法启动
fn non_zero(name: &str, value: u64, default: u64) -> u64 {
    if value == 0 {
        tracing::warn!("{} must be greater than 0, using default {}", name, default);
        default
    } else {
        value
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            cache_sweep_interval_secs: 30,
            stats_cache_ttl_secs: CacheTtl::STATS.as_secs(),
            stats_interval_secs: 30,
            stats_freshness_secs: 60,
            stats_provider_timeout_secs: 10,
            stats_overlap_policy: OverlapPolicy::Skip,
            rate_limit_window_secs: 900,
            rate_limit_requests: 100,
            rate_limit_count_only_success: false,
            rate_limit_count_only_failure: false,
            strict_rate_limit_window_secs: 60,
            strict_rate_limit_requests: 10,
            rate_limit_cleanup_interval_secs: 60,
            live_state_max_age_secs: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let stats_overlap_policy = match env::var("STATS_OVERLAP_POLICY") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidOverlapPolicy(raw))?,
            Err(_) => defaults.stats_overlap_policy,
        };

        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: var_or("SERVER_PORT", defaults.server_port),
            api_base_uri: env::var("API_BASE_URI").unwrap_or(defaults.api_base_uri),
            cache_sweep_interval_secs: var_or(
                "CACHE_SWEEP_INTERVAL_SECS",
                defaults.cache_sweep_interval_secs,
            ),
            stats_cache_ttl_secs: var_or("STATS_CACHE_TTL_SECS", defaults.stats_cache_ttl_secs),
            stats_interval_secs: var_or("STATS_INTERVAL_SECS", defaults.stats_interval_secs),
            stats_freshness_secs: var_or("STATS_FRESHNESS_SECS", defaults.stats_freshness_secs),
            stats_provider_timeout_secs: var_or(
                "STATS_PROVIDER_TIMEOUT_SECS",
                defaults.stats_provider_timeout_secs,
            ),
            stats_overlap_policy,
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests),
            rate_limit_count_only_success: var_or(
                "RATE_LIMIT_COUNT_ONLY_SUCCESS",
                defaults.rate_limit_count_only_success,
            ),
            rate_limit_count_only_failure: var_or(
                "RATE_LIMIT_COUNT_ONLY_FAILURE",
                defaults.rate_limit_count_only_failure,
            ),
            strict_rate_limit_window_secs: var_or(
                "STRICT_RATE_LIMIT_WINDOW_SECS",
                defaults.strict_rate_limit_window_secs,
            ),
            strict_rate_limit_requests: var_or(
                "STRICT_RATE_LIMIT_REQUESTS",
                defaults.strict_rate_limit_requests,
            ),
            rate_limit_cleanup_interval_secs: var_or(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                defaults.rate_limit_cleanup_interval_secs,
            ),
            live_state_max_age_secs: var_or(
                "LIVE_STATE_MAX_AGE_SECS",
                defaults.live_state_max_age_secs,
            ),
        };
        Ok(config.validated())
    }

    /// 把为 0 的间隔、窗口和超时换成默认值
    pub fn validated(self) -> Self {
        let defaults = Config::default();
        Config {
            cache_sweep_interval_secs: non_zero(
                "CACHE_SWEEP_INTERVAL_SECS",
                self.cache_sweep_interval_secs,
                defaults.cache_sweep_interval_secs,
            ),
            stats_interval_secs: non_zero(
                "STATS_INTERVAL_SECS",
                self.stats_interval_secs,
                defaults.stats_interval_secs,
            ),
            stats_provider_timeout_secs: non_zero(
                "STATS_PROVIDER_TIMEOUT_SECS",
                self.stats_provider_timeout_secs,
                defaults.stats_provider_timeout_secs,
            ),
            rate_limit_window_secs: non_zero(
                "RATE_LIMIT_WINDOW_SECS",
                self.rate_limit_window_secs,
                defaults.rate_limit_window_secs,
            ),
            strict_rate_limit_window_secs: non_zero(
                "STRICT_RATE_LIMIT_WINDOW_SECS",
                self.strict_rate_limit_window_secs,
                defaults.strict_rate_limit_window_secs,
            ),
            rate_limit_cleanup_interval_secs: non_zero(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                self.rate_limit_cleanup_interval_secs,
                defaults.rate_limit_cleanup_interval_secs,
            ),
            ..self
        }
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }

    pub fn stats_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn stats_freshness(&self) -> Duration {
        Duration::from_secs(self.stats_freshness_secs)
    }

    pub fn stats_provider_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_provider_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn strict_rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.strict_rate_limit_window_secs)
    }

    pub fn rate_limit_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cleanup_interval_secs)
    }

    pub fn live_state_max_age(&self) -> Duration {
        Duration::from_secs(self.live_state_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_intervals_fall_back_to_defaults() {
        let config = Config {
            cache_sweep_interval_secs: 0,
            stats_interval_secs: 0,
            stats_provider_timeout_secs: 0,
            rate_limit_window_secs: 0,
            strict_rate_limit_window_secs: 0,
            rate_limit_cleanup_interval_secs: 0,
            stats_cache_ttl_secs: 0,
            ..Config::default()
        }
        .validated();
        let defaults = Config::default();

        assert_eq!(config.cache_sweep_interval(), defaults.cache_sweep_interval());
        assert_eq!(config.stats_interval(), defaults.stats_interval());
        assert_eq!(config.stats_provider_timeout(), defaults.stats_provider_timeout());
        assert_eq!(config.rate_limit_window(), defaults.rate_limit_window());
        assert_eq!(config.strict_rate_limit_window(), defaults.strict_rate_limit_window());
        assert_eq!(
            config.rate_limit_cleanup_interval(),
            defaults.rate_limit_cleanup_interval()
        );
        // TTL 为 0 表示不缓存，保持原值
        assert!(config.stats_cache_ttl().is_zero());
    }

    #[test]
    fn non_zero_values_are_kept() {
        let config = Config {
            stats_interval_secs: 5,
            rate_limit_window_secs: 1,
            ..Config::default()
        }
        .validated();
        assert_eq!(config.stats_interval_secs, 5);
        assert_eq!(config.rate_limit_window_secs, 1);
    }

    #[test]
    fn config_error_message_names_variable() {
        let err = ConfigError::InvalidOverlapPolicy("merge".into());
        assert!(err.to_string().starts_with("STATS_OVERLAP_POLICY 无效: merge"));
    }
}
