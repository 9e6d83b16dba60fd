use sha2::{Digest, Sha256};

/// HTTP 请求缓存键前缀
const REQUEST_PREFIX: &str = "req:";

/// 查询串超过该长度时改用摘要
const MAX_QUERY_LEN: usize = 128;

/// 生成 HTTP 请求缓存键
///
/// 路径保持明文，这样按业务域（"economy"、"tickets" 等）做模式失效时仍能命中；
/// 过长的查询串用 SHA-256 摘要代替，避免键无限增长。
pub fn request_key(method: &str, path_and_query: &str, scope: Option<&str>) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let mut key = format!(
        "{}{}:{}:{}",
        REQUEST_PREFIX,
        scope.unwrap_or("public"),
        method.to_ascii_uppercase(),
        path
    );

    match query {
        Some(q) if q.len() > MAX_QUERY_LEN => {
            key.push('#');
            key.push_str(&hex_digest(q));
        }
        Some(q) if !q.is_empty() => {
            key.push('?');
            key.push_str(q);
        }
        _ => {}
    }

    key
}

/// 生成业务域缓存键，例如 `economy:guild:42`
pub fn domain_key(domain: &str, parts: &[&str]) -> String {
    let mut key = domain.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

fn hex_digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_key_keeps_path_readable() {
        let key = request_key("get", "/api/stats/commands?limit=5", None);
        assert_eq!(key, "req:public:GET:/api/stats/commands?limit=5");
    }

    #[test]
    fn long_query_is_hashed() {
        let query = "x".repeat(300);
        let key = request_key("GET", &format!("/api/economy/top?{}", query), Some("user-1"));
        assert!(key.starts_with("req:user-1:GET:/api/economy/top#"));
        // 64 位十六进制摘要
        assert_eq!(key.split('#').nth(1).map(str::len), Some(64));
    }

    #[test]
    fn domain_key_joins_parts() {
        assert_eq!(domain_key("economy", &["guild", "42"]), "economy:guild:42");
    }
}
