mod error_handler;
mod rate_limit;
mod response_cache;

pub use error_handler::log_errors;
pub use rate_limit::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET, rate_limit};
pub use response_cache::{ResponseCache, X_CACHE, X_CACHE_BYPASS, X_CACHE_TTL, cache_response};
