mod handler;
mod model;

pub use handler::{cache_status, clear_cache, health};
pub use model::{
    ClearCacheQuery, ClearCacheResponse, HealthResponse, LimiterReport, MonitoringReport,
};
