use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    cache::{CacheStore, CacheValue, CachedResponse, keys::request_key},
    error::AppError,
    rate_limit::keys::USER_ID_HEADER,
};

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_TTL: &str = "x-cache-ttl";
/// 客户端要求跳过缓存
pub const X_CACHE_BYPASS: &str = "x-cache-bypass";

/// 缓存响应体的大小上限
const MAX_CACHED_BODY: usize = 4 * 1024 * 1024;

/// 响应缓存中间件状态，每组路由可以使用不同的 TTL
#[derive(Clone)]
pub struct ResponseCache {
    cache: Arc<CacheStore>,
    ttl: Duration,
    per_user: bool,
}

impl ResponseCache {
    pub fn new(cache: Arc<CacheStore>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            per_user: false,
        }
    }

    /// 按 `x-user-id` 区分缓存
    pub fn per_user(mut self) -> Self {
        self.per_user = true;
        self
    }

    fn key_for(&self, req: &Request<Body>) -> String {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri().path());
        let scope = if self.per_user {
            req.headers()
                .get(USER_ID_HEADER)
                .and_then(|h| h.to_str().ok())
        } else {
            None
        };
        request_key(req.method().as_str(), path_and_query, scope)
    }
}

fn wants_bypass(req: &Request<Body>) -> bool {
    if req.headers().contains_key(X_CACHE_BYPASS) {
        return true;
    }
    req.headers()
        .get(header::CACHE_CONTROL)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.contains("no-cache") || v.contains("no-store"))
}

fn ttl_header(ttl: Duration) -> HeaderValue {
    HeaderValue::from(ttl.as_millis().div_ceil(1000) as u64)
}

/// 响应缓存中间件
///
/// GET 请求命中时直接返回缓存内容；未命中时执行处理器，2xx 响应写回缓存。
pub async fn cache_response(
    State(state): State<ResponseCache>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET || state.ttl.is_zero() || wants_bypass(&req) {
        let mut response = next.run(req).await;
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("BYPASS"));
        return response;
    }

    let key = state.key_for(&req);

    if let Some((value, remaining)) = state.cache.get_with_ttl(&key) {
        if let Some(cached) = value.into_response() {
            let mut response = (StatusCode::OK, Body::from(cached.body)).into_response();
            let headers = response.headers_mut();
            if let Some(content_type) = cached
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
            {
                headers.insert(header::CONTENT_TYPE, content_type);
            }
            headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
            headers.insert(X_CACHE_TTL, ttl_header(remaining));
            return response;
        }
    }

    let mut response = next.run(req).await;
    if !response.status().is_success() {
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("MISS"));
        return response;
    }

    let (mut parts, body) = response.into_parts();
    // 大小未知（流式）或超过上限的响应原样返回，不缓存
    let cacheable = body
        .size_hint()
        .upper()
        .is_some_and(|len| len <= MAX_CACHED_BODY as u64);
    if !cacheable {
        parts
            .headers
            .insert(X_CACHE, HeaderValue::from_static("MISS"));
        return Response::from_parts(parts, body);
    }

    let bytes = match to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to buffer response body for {}: {}", key, e);
            return AppError::InternalServerError.into_response();
        }
    };

    state.cache.set(
        key,
        CacheValue::Response(CachedResponse {
            content_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
            body: bytes.clone(),
        }),
        state.ttl,
    );

    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    parts.headers.insert(X_CACHE_TTL, ttl_header(state.ttl));
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    fn router(cache: Arc<CacheStore>) -> Router {
        Router::new()
            .route("/small", get(|| async { "pong" }))
            .route("/large", get(|| async { vec![b'x'; MAX_CACHED_BODY + 1024] }))
            .route_layer(from_fn_with_state(
                ResponseCache::new(cache, Duration::from_secs(30)),
                cache_response,
            ))
    }

    async fn fetch(router: &Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        router.clone().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn oversized_body_passes_through_uncached() {
        let cache = Arc::new(CacheStore::new());
        let router = router(cache.clone());

        for _ in 0..2 {
            let response = fetch(&router, "/large").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get(X_CACHE).unwrap(), "MISS");
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(body.len(), MAX_CACHED_BODY + 1024);
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn small_body_is_cached() {
        let cache = Arc::new(CacheStore::new());
        let router = router(cache.clone());

        assert_eq!(fetch(&router, "/small").await.headers().get(X_CACHE).unwrap(), "MISS");
        let hit = fetch(&router, "/small").await;
        assert_eq!(hit.headers().get(X_CACHE).unwrap(), "HIT");
        let body = to_bytes(hit.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"pong");
    }
}
