use axum::{
    Json,
    extract::{Query, State},
};

use super::model::{
    ClearCacheQuery, ClearCacheResponse, HealthResponse, LimiterReport, MonitoringReport,
};
use crate::{
    AppState,
    cache::KeyPattern,
    error::AppError,
    utils::{ApiResponse, success_to_api_response},
};

/// 健康检查接口
pub async fn health() -> Json<ApiResponse<HealthResponse>> {
    success_to_api_response(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

// 缓存、限流、快照运行状态
pub async fn cache_status(State(state): State<AppState>) -> Json<ApiResponse<MonitoringReport>> {
    let rate_limiters: Vec<LimiterReport> = state
        .limiters
        .all()
        .into_iter()
        .map(|limiter| LimiterReport {
            name: limiter.name().to_string(),
            status: limiter.status(),
        })
        .collect();
    let active_rate_limit_keys = rate_limiters.iter().map(|r| r.status.active_keys).sum();

    success_to_api_response(MonitoringReport {
        cache: state.cache.stats(),
        rate_limiters,
        active_rate_limit_keys,
        stats_age_secs: state.aggregator.stats_age().map(|age| age.as_secs_f64()),
        aggregator_running: state.aggregator.is_running(),
    })
}

// 按模式清除缓存，不带模式时全部清除
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<ClearCacheQuery>,
) -> Result<Json<ApiResponse<ClearCacheResponse>>, AppError> {
    let cleared = match query.pattern.as_deref().filter(|p| !p.is_empty()) {
        None => {
            let count = state.cache.len();
            state.cache.clear();
            count
        }
        Some(pattern) => {
            let pattern = if query.regex {
                KeyPattern::regex(pattern)
                    .map_err(|e| AppError::Validation(format!("正则表达式无效: {}", e)))?
            } else {
                KeyPattern::substring(pattern)
            };
            state.cache.invalidate_pattern(&pattern)
        }
    };

    tracing::info!("Cache cleared: {} entries (pattern {:?})", cleared, query.pattern);
    Ok(success_to_api_response(ClearCacheResponse {
        cleared,
        pattern: query.pattern,
    }))
}
