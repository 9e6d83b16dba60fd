use axum::{
    Json,
    extract::{Path, State},
};

use super::model::{RecordCommandResponse, is_valid_command_name};
use crate::{
    AppState,
    cache::KeyPattern,
    error::AppError,
    utils::{ApiResponse, success_to_api_response},
};

/// 命令相关缓存所在的业务域
const COMMANDS_DOMAIN: &str = "commands";

// 记录一次命令调用，并清除命令相关缓存
pub async fn record_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<RecordCommandResponse>>, AppError> {
    if !is_valid_command_name(&name) {
        return Err(AppError::Validation(format!("命令名无效: {}", name)));
    }

    state.aggregator.increment_command(&name);
    let invalidated = state
        .cache
        .invalidate_pattern(&KeyPattern::substring(COMMANDS_DOMAIN));

    Ok(success_to_api_response(RecordCommandResponse {
        command: name,
        invalidated,
    }))
}
