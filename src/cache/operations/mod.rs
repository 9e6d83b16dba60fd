/// 缓存操作
/// 提供缓存读写、批量失效以及后台清理
pub mod store;
pub mod sweeper;

// 重新导出常用操作
pub use store::CacheStore;
pub use sweeper::spawn_sweeper;
