use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

use crate::{
    AppState,
    error::AppError,
    stats::{SectionKind, StatsSnapshot},
    utils::{ApiResponse, success_to_api_response},
};

// 获取统计快照，快照过旧时先刷新
pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsSnapshot>> {
    let snapshot = state
        .aggregator
        .get_fresh(state.config.stats_freshness())
        .await;
    success_to_api_response(snapshot.as_ref().clone())
}

// 获取单个分区
pub async fn get_section(
    State(state): State<AppState>,
    Path(section): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let kind: SectionKind = section
        .parse()
        .map_err(|name| AppError::NotFound(format!("统计分区 {}", name)))?;

    let snapshot = state
        .aggregator
        .get_fresh(state.config.stats_freshness())
        .await;
    Ok(success_to_api_response(snapshot.section_json(kind)))
}

// 强制刷新
pub async fn refresh_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsSnapshot>> {
    let snapshot = state.aggregator.refresh().await;
    tracing::info!(
        "Stats refreshed on demand, generation {} in {}ms",
        snapshot.generation,
        snapshot.collection_ms
    );
    success_to_api_response(snapshot.as_ref().clone())
}
