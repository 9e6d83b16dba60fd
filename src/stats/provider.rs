use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::snapshot::SectionData;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider panicked")]
    Panicked,
}

/// 快照数据源
///
/// 可以是本地计数器读取，也可以是对数据库或外部状态缓存的异步调用。
/// 各数据源相互独立，单个失败只影响自己负责的分区。
#[async_trait]
pub trait StatsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self) -> Result<SectionData, ProviderError>;
}

/// 同步闭包数据源
pub struct SyncFnProvider<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> StatsProvider for SyncFnProvider<F>
where
    F: Fn() -> Result<SectionData, ProviderError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<SectionData, ProviderError> {
        (self.f)()
    }
}

/// 异步闭包数据源
pub struct AsyncFnProvider<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> StatsProvider for AsyncFnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<SectionData, ProviderError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<SectionData, ProviderError> {
        (self.f)().await
    }
}

pub fn sync_provider<F>(name: impl Into<String>, f: F) -> Arc<dyn StatsProvider>
where
    F: Fn() -> Result<SectionData, ProviderError> + Send + Sync + 'static,
{
    Arc::new(SyncFnProvider {
        name: name.into(),
        f,
    })
}

pub fn async_provider<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn StatsProvider>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SectionData, ProviderError>> + Send + 'static,
{
    Arc::new(AsyncFnProvider {
        name: name.into(),
        f,
    })
}
