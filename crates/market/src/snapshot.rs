use chrono::{DateTime, Utc};
use kline_core::market::entity::Kline;
use kline_core::market::error::SeriesError;
use rust_decimal::Decimal;

/// # Summary
/// 规范化 K 线序列：按开盘时间升序，并对重复开盘时间去重。
///
/// # Logic
/// 1. 按 `open_time` 稳定排序，相同键保持输入中的先后次序。
/// 2. 相同键只保留最后出现的一条（即最近一次合并的版本）。
///
/// # Arguments
/// * `records`: 任意顺序、可能重复的 K 线。
///
/// # Returns
/// 严格升序且键唯一的 K 线列表。纯函数，无副作用。
pub fn normalize(mut records: Vec<Kline>) -> Vec<Kline> {
    records.sort_by_key(|k| k.open_time);
    let mut out: Vec<Kline> = Vec::with_capacity(records.len());
    for record in records {
        match out.last_mut() {
            Some(last) if last.open_time == record.open_time => *last = record,
            _ => out.push(record),
        }
    }
    out
}

/// # Summary
/// 校验序列满足存储不变量。
///
/// # Logic
/// 1. 每根 K 线满足 `close_time > open_time`。
/// 2. 开盘时间严格递增（同时意味着键唯一）。
///
/// # Returns
/// 合法返回 Ok，否则返回 `SeriesError::InvalidInput`。
pub fn verify_series(records: &[Kline]) -> Result<(), SeriesError> {
    for record in records {
        record.validate()?;
    }
    if let Some(pair) = records.windows(2).find(|w| w[0].open_time >= w[1].open_time) {
        return Err(SeriesError::InvalidInput(format!(
            "series not strictly ascending: {} followed by {}",
            pair[0].open_time, pair[1].open_time
        )));
    }
    Ok(())
}

/// # Summary
/// 供下游消费的物化行，时间字段已转换为 UTC 时间。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineRow {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub quote_asset_volume: Decimal,
    pub num_trades: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    pub ignore: String,
}

impl TryFrom<Kline> for KlineRow {
    type Error = SeriesError;

    fn try_from(k: Kline) -> Result<Self, Self::Error> {
        Ok(Self {
            open_time: k.open_datetime()?,
            close_time: k.close_datetime()?,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            quote_asset_volume: k.quote_asset_volume,
            num_trades: k.num_trades,
            taker_buy_base_volume: k.taker_buy_base_volume,
            taker_buy_quote_volume: k.taker_buy_quote_volume,
            ignore: k.ignore,
        })
    }
}

/// # Summary
/// 将快照物化为下游可直接消费的行。
///
/// # Logic
/// 1. 再次规范化（去重、排序），对一致的快照不产生任何变化。
/// 2. 解析并校验时间字段，越界时间戳返回 `InvalidInput`。
///
/// # Arguments
/// * `snapshot`: `SeriesStore::snapshot` 的结果。
///
/// # Returns
/// 升序、无重复的物化行。不会修改存储。
pub fn materialize(snapshot: Vec<Kline>) -> Result<Vec<KlineRow>, SeriesError> {
    normalize(snapshot)
        .into_iter()
        .map(KlineRow::try_from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kline_core::market::mock::sample_kline;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_sorts_and_keeps_last_duplicate() {
        let records = vec![
            sample_kline(120_000, dec!(3)),
            sample_kline(0, dec!(1)),
            sample_kline(60_000, dec!(2)),
            sample_kline(0, dec!(9)),
        ];
        let out = normalize(records);
        let keys: Vec<i64> = out.iter().map(|k| k.open_time).collect();
        assert_eq!(keys, vec![0, 60_000, 120_000]);
        assert_eq!(out[0].close, dec!(9));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(vec![sample_kline(60_000, dec!(2)), sample_kline(0, dec!(1))]);
        assert_eq!(normalize(once.clone()), once);
    }

    #[test]
    fn test_verify_rejects_unordered_and_inverted() {
        let unordered = vec![sample_kline(60_000, dec!(1)), sample_kline(0, dec!(1))];
        assert!(matches!(
            verify_series(&unordered),
            Err(SeriesError::InvalidInput(_))
        ));

        let mut inverted = sample_kline(0, dec!(1));
        inverted.close_time = -1;
        assert!(verify_series(&[inverted]).is_err());
        assert!(verify_series(&[]).is_ok());
    }

    #[test]
    fn test_materialize_converts_timestamps() {
        let rows = materialize(vec![
            sample_kline(1_717_200_060_000, dec!(2)),
            sample_kline(1_717_200_000_000, dec!(1)),
        ])
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].open_time.timestamp_millis(), 1_717_200_000_000);
        assert_eq!(rows[0].close_time.timestamp_millis(), 1_717_200_059_999);
        assert_eq!(rows[1].close, dec!(2));
    }

    #[test]
    fn test_materialize_rejects_out_of_range_timestamp() {
        let mut bad = sample_kline(0, dec!(1));
        bad.open_time = i64::MAX - 10;
        bad.close_time = i64::MAX;
        assert!(matches!(
            materialize(vec![bad]),
            Err(SeriesError::InvalidInput(_))
        ));
    }
}
