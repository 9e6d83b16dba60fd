use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;

use crate::{
    rate_limit::{Admission, RateLimitDecision, RateLimitRejection, RateLimiter},
    utils::{error_codes, error_with_data},
};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

fn insert_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    let reset = decision
        .reset_at_utc()
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(RATE_LIMIT_RESET, value);
    }
}

fn rejection_response(limiter: &RateLimiter, decision: &RateLimitDecision) -> Response {
    let rejection = RateLimitRejection::from(decision);
    let retry_after = rejection.retry_after_secs;

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        error_with_data(
            error_codes::RATE_LIMIT,
            format!("{}，请在{}秒后重试", limiter.config().message, retry_after),
            rejection,
        ),
    )
        .into_response();

    let headers = response.headers_mut();
    insert_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// 限流中间件
///
/// 超额直接返回 429，不调用处理器；放行的请求在响应产生后按响应状态计数一次。
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if limiter.should_skip(&req) {
        return next.run(req).await;
    }

    let key = limiter.key_for(&req);
    match limiter.admit(&key) {
        Admission::Rejected(decision) => rejection_response(&limiter, &decision),
        Admission::Allowed { decision, ticket } => {
            // 处理器 panic 或请求被取消时 ticket 随之丢弃，按失败计数
            let mut response = next.run(req).await;

            let status = response.status();
            if catch_unwind(AssertUnwindSafe(move || ticket.complete(status))).is_err() {
                tracing::error!("限流计数失败 [{}] key={}", limiter.name(), key);
            }

            insert_headers(response.headers_mut(), &decision);
            response
        }
    }
}
