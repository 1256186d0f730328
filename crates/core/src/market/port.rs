use crate::common::SeriesKey;
use crate::market::entity::Kline;
use crate::market::error::SourceError;
use async_trait::async_trait;

/// 交易所单页 K 线上限，同时作为回补的固定页大小。
pub const PAGE_LIMIT: usize = 1000;

/// # Summary
/// 分页 K 线数据源接口（原始行情提供者）。
///
/// # Invariants
/// - 实现者必须对每个请求设置超时，超时以 `SourceError::Timeout` 返回。
/// - 返回的 K 线保持数据源给出的原始顺序，不做去重或排序。
/// - 实现者不得持有任何序列存储的锁。
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// # Summary
    /// 获取指定时间窗口内的一页历史 K 线。
    ///
    /// # Logic
    /// 1. 以 `start_ms` 为起点、`end_ms` 为终点构建请求。
    /// 2. 执行网络请求并逐条解码 12 字段数组。
    ///
    /// # Arguments
    /// * `key`: 交易对与周期。
    /// * `start_ms`: 起始时间（包含）。
    /// * `end_ms`: 截止时间。
    /// * `limit`: 单页条数上限。
    ///
    /// # Returns
    /// 成功返回 0..=limit 条 K 线。
    async fn fetch_page(
        &self,
        key: &SeriesKey,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Kline>, SourceError>;

    /// # Summary
    /// 获取最新的一根 K 线（可能尚未收盘）。
    ///
    /// # Logic
    /// 1. 发起不带时间窗口、`limit=1` 的请求。
    ///
    /// # Arguments
    /// * `key`: 交易对与周期。
    ///
    /// # Returns
    /// 数据源有数据时返回 `Some`，空数组返回 `None`。
    async fn fetch_latest(&self, key: &SeriesKey) -> Result<Option<Kline>, SourceError>;
}
