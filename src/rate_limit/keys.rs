use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath},
    http::Request,
};

/// 上游认证层写入的用户标识头
pub const USER_ID_HEADER: &str = "x-user-id";

/// 获取客户端 IP
///
/// 优先 `x-real-ip`，其次 `x-forwarded-for` 中第一个非空地址，最后降级使用连接信息。
pub fn client_ip(req: &Request<Body>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

/// 路由模板（例如 `/api/guilds/{guild_id}`），取不到时使用原始路径
pub fn route_of(req: &Request<Body>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

/// 从路径 `/guilds/{id}` 或查询参数 `guild_id` 中取服务器 ID
pub fn guild_id(req: &Request<Body>) -> Option<String> {
    let mut segments = req.uri().path().split('/');
    while let Some(segment) = segments.next() {
        if segment == "guilds" {
            if let Some(id) = segments.next().filter(|s| !s.is_empty()) {
                return Some(id.to_string());
            }
        }
    }

    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("guild_id=")
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    })
}

/// 默认键：IP + 路由
pub fn ip_and_route(req: &Request<Body>) -> String {
    format!("{}:{}", client_ip(req), route_of(req))
}

/// IP + 服务器，没有服务器 ID 时退化为 IP + 路由
pub fn ip_and_guild(req: &Request<Body>) -> String {
    match guild_id(req) {
        Some(guild) => format!("{}:guild:{}", client_ip(req), guild),
        None => ip_and_route(req),
    }
}

/// 已认证请求按用户计数，否则按 IP
pub fn user_or_ip(req: &Request<Body>) -> String {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|user| format!("user:{}", user.trim()))
        .unwrap_or_else(|| format!("ip:{}", client_ip(req)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn forwarded_for_takes_first_address() {
        let req = Request::builder()
            .uri("/api/stats")
            .header("x-forwarded-for", " , 10.0.0.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "10.0.0.7");
    }

    #[test]
    fn real_ip_wins_over_connect_info() {
        let mut req = Request::builder()
            .uri("/api/stats")
            .header("x-real-ip", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9000))));
        assert_eq!(client_ip(&req), "1.2.3.4");
    }

    #[test]
    fn connect_info_fallback() {
        let mut req = request("/api/stats");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9000))));
        assert_eq!(ip_and_route(&req), "127.0.0.1:/api/stats");
    }

    #[test]
    fn guild_from_path_or_query() {
        assert_eq!(guild_id(&request("/api/guilds/42/economy")), Some("42".into()));
        assert_eq!(guild_id(&request("/api/economy?guild_id=7")), Some("7".into()));
        assert_eq!(guild_id(&request("/api/economy")), None);
        assert_eq!(ip_and_guild(&request("/api/guilds/42")), "unknown:guild:42");
    }

    #[test]
    fn user_header_preferred() {
        let req = Request::builder()
            .uri("/")
            .header(USER_ID_HEADER, "1001")
            .body(Body::empty())
            .unwrap();
        assert_eq!(user_or_ip(&req), "user:1001");
        assert_eq!(user_or_ip(&request("/")), "ip:unknown");
    }
}
