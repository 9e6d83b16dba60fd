use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};

use crate::{
    AppState,
    middleware::{ResponseCache, cache_response, log_errors, rate_limit},
    routes,
};

// 统计查询路由，响应进入请求缓存
fn stats_routes(state: &AppState) -> Router<AppState> {
    let response_cache = ResponseCache::new(state.cache.clone(), state.config.stats_cache_ttl());

    Router::new()
        .route("/stats", get(routes::stats::get_stats))
        .route("/stats/{section}", get(routes::stats::get_section))
        .route_layer(from_fn_with_state(response_cache, cache_response))
}

// 写操作和监控路由，额外使用严格限流
fn mutation_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/stats/refresh", post(routes::stats::refresh_stats))
        .route("/commands/{name}", post(routes::commands::record_command))
        .route("/live-state", put(routes::live_state::update_live_state))
        .route("/monitoring/cache", get(routes::monitoring::cache_status))
        .route("/monitoring/cache/clear", post(routes::monitoring::clear_cache))
        .route_layer(from_fn_with_state(state.limiters.strict.clone(), rate_limit))
}

// 创建主路由
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(routes::monitoring::health))
        .merge(stats_routes(&state))
        .merge(mutation_routes(&state));

    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(from_fn_with_state(state.limiters.api.clone(), rate_limit))
        .layer(from_fn(log_errors))
        .with_state(state)
}
