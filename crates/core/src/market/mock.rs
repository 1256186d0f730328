use crate::common::SeriesKey;
use crate::market::entity::Kline;
use crate::market::error::SourceError;
use crate::market::port::KlineSource;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// 一次分页请求的记录，供测试断言游标推进。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub start_ms: i64,
    pub end_ms: i64,
    pub limit: usize,
}

/// # Summary
/// 按脚本返回结果的模拟数据源，用于回补与轮询测试。
///
/// # Invariants
/// - 分页与最新 K 线两条脚本各自按 FIFO 消费。
/// - 脚本耗尽后分页返回空页，最新 K 线返回 `None`。
#[derive(Default)]
pub struct MockKlineSource {
    pages: Mutex<VecDeque<Result<Vec<Kline>, SourceError>>>,
    latest: Mutex<VecDeque<Result<Option<Kline>, SourceError>>>,
    requests: Mutex<Vec<PageRequest>>,
    latest_calls: Mutex<usize>,
    latest_delay: Option<Duration>,
}

impl MockKlineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 `fetch_latest` 前人为等待，用于模拟慢请求。
    pub fn with_latest_delay(mut self, delay: Duration) -> Self {
        self.latest_delay = Some(delay);
        self
    }

    pub fn push_page(&self, page: Result<Vec<Kline>, SourceError>) {
        self.pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(page);
    }

    pub fn push_latest(&self, latest: Result<Option<Kline>, SourceError>) {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(latest);
    }

    /// 迄今为止收到的全部分页请求。
    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn latest_calls(&self) -> usize {
        *self.latest_calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KlineSource for MockKlineSource {
    async fn fetch_page(
        &self,
        _: &SeriesKey,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Kline>, SourceError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PageRequest {
                start_ms,
                end_ms,
                limit,
            });
        self.pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_latest(&self, _: &SeriesKey) -> Result<Option<Kline>, SourceError> {
        *self.latest_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if let Some(delay) = self.latest_delay {
            tokio::time::sleep(delay).await;
        }
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Ok(None))
    }
}

/// # Summary
/// 构造测试用 K 线。
///
/// # Logic
/// `close_time = open_time + 59_999`，价格全部取 `close`。
pub fn sample_kline(open_time: i64, close: Decimal) -> Kline {
    Kline {
        open_time,
        open: close,
        high: close,
        low: close,
        close,
        volume: Decimal::ONE,
        close_time: open_time + 59_999,
        quote_asset_volume: close,
        num_trades: 1,
        taker_buy_base_volume: Decimal::ZERO,
        taker_buy_quote_volume: Decimal::ZERO,
        ignore: "0".to_string(),
    }
}

/// 构造一页首尾相接的 K 线，第 i 根的开盘时间为 `first_open + i * step`。
pub fn sample_page(first_open: i64, step: i64, count: usize) -> Vec<Kline> {
    let mut page = Vec::with_capacity(count);
    let mut open_time = first_open;
    for _ in 0..count {
        page.push(Kline {
            close_time: open_time + step - 1,
            ..sample_kline(open_time, Decimal::ONE_HUNDRED)
        });
        open_time += step;
    }
    page
}
