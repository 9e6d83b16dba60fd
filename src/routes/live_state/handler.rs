use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::{
    AppState,
    cache::KeyPattern,
    stats::sources::LiveStateReport,
    utils::{ApiResponse, success_to_api_response},
};

/// 统计接口的请求缓存键都包含该路径片段
const STATS_ROUTE_SEGMENT: &str = "/stats";

// 机器人进程上报实时状态
pub async fn update_live_state(
    State(state): State<AppState>,
    Json(report): Json<LiveStateReport>,
) -> Json<ApiResponse<Value>> {
    state.live_state.update(report);

    // 只清除 HTTP 层缓存，快照本身等下一轮聚合
    let invalidated = state
        .cache
        .invalidate_pattern(&KeyPattern::substring(STATS_ROUTE_SEGMENT));
    success_to_api_response(json!({ "invalidated": invalidated }))
}
