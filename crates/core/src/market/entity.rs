use crate::common::time::ms_to_datetime;
use crate::market::error::SeriesError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 单根 K 线数据实体，对应交易所 klines 接口返回的一行 12 字段数组。
///
/// # Invariants
/// - `open_time` 是序列内的唯一键。
/// - `close_time` 必须严格大于 `open_time`。
/// - 价格与成交量全部使用 `Decimal` 保存，展示之前不做任何浮点转换。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    // K 线开盘时间 (毫秒时间戳)
    pub open_time: i64,
    // 开盘价
    pub open: Decimal,
    // 最高价
    pub high: Decimal,
    // 最低价
    pub low: Decimal,
    // 收盘价
    pub close: Decimal,
    // 成交量 (基础资产)
    pub volume: Decimal,
    // K 线收盘时间 (毫秒时间戳)，下一页的游标由它推出
    pub close_time: i64,
    // 成交额 (计价资产)
    pub quote_asset_volume: Decimal,
    // 成交笔数
    pub num_trades: u64,
    // 主动买入成交量
    pub taker_buy_base_volume: Decimal,
    // 主动买入成交额
    pub taker_buy_quote_volume: Decimal,
    // 保留字段，原样透传
    pub ignore: String,
}

impl Kline {
    /// # Summary
    /// 校验单根 K 线的时间完整性。
    ///
    /// # Logic
    /// 1. 检查 `close_time > open_time`。
    ///
    /// # Returns
    /// 合法返回 Ok，否则返回 `SeriesError::InvalidInput`。
    pub fn validate(&self) -> Result<(), SeriesError> {
        if self.close_time <= self.open_time {
            return Err(SeriesError::InvalidInput(format!(
                "kline {} has close_time {} not after open_time",
                self.open_time, self.close_time
            )));
        }
        Ok(())
    }

    /// 开盘时间转换为 UTC 时间。
    pub fn open_datetime(&self) -> Result<DateTime<Utc>, SeriesError> {
        ms_to_datetime(self.open_time)
    }

    /// 收盘时间转换为 UTC 时间。
    pub fn close_datetime(&self) -> Result<DateTime<Utc>, SeriesError> {
        ms_to_datetime(self.close_time)
    }
}
