pub mod time;

use crate::market::error::SeriesError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 现货 klines 接口地址
pub const SPOT_KLINES_URL: &str = "https://api.binance.com/api/v3/klines";
/// U 本位合约 klines 接口地址
pub const FUTURES_KLINES_URL: &str = "https://fapi.binance.com/fapi/v1/klines";

/// # Summary
/// 市场类型，决定请求的接口族。两者只在 base URL 上不同。
///
/// # Invariants
/// - 只接受 `spot` 与 `futures`，其余取值在构造时即报 `Configuration` 错误。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    // 现货
    Spot,
    // U 本位合约
    Futures,
}

impl MarketType {
    /// 返回该市场对应的 klines 接口地址。
    pub fn base_url(&self) -> &'static str {
        match self {
            MarketType::Spot => SPOT_KLINES_URL,
            MarketType::Futures => FUTURES_KLINES_URL,
        }
    }
}

impl FromStr for MarketType {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures" => Ok(MarketType::Futures),
            _ => Err(SeriesError::Configuration(format!(
                "market_type must be either 'spot' or 'futures', got '{}'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Spot => write!(f, "spot"),
            MarketType::Futures => write!(f, "futures"),
        }
    }
}

/// # Summary
/// K 线周期枚举，与交易所的 interval 标签一一对应。
///
/// # Invariants
/// - `Display` 输出与 `FromStr` 接受的标签完全一致。
/// - 月线标签 `1M` 区分大小写，与分钟线 `1m` 不同。
/// - 序列化形式同样是交易所标签。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Second1,
    Minute1,
    Minute3,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl Interval {
    /// 交易所使用的周期标签。
    pub fn label(&self) -> &'static str {
        match self {
            Interval::Second1 => "1s",
            Interval::Minute1 => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }

    /// # Summary
    /// 周期的名义时长（毫秒）。
    ///
    /// # Logic
    /// 月线按 30 天计，仅用于日志与估算，不参与分页游标计算。
    pub fn duration_ms(&self) -> i64 {
        const S: i64 = 1_000;
        const M: i64 = 60 * S;
        const H: i64 = 60 * M;
        const D: i64 = 24 * H;
        match self {
            Interval::Second1 => S,
            Interval::Minute1 => M,
            Interval::Minute3 => 3 * M,
            Interval::Minute5 => 5 * M,
            Interval::Minute15 => 15 * M,
            Interval::Minute30 => 30 * M,
            Interval::Hour1 => H,
            Interval::Hour2 => 2 * H,
            Interval::Hour4 => 4 * H,
            Interval::Hour6 => 6 * H,
            Interval::Hour8 => 8 * H,
            Interval::Hour12 => 12 * H,
            Interval::Day1 => D,
            Interval::Day3 => 3 * D,
            Interval::Week1 => 7 * D,
            Interval::Month1 => 30 * D,
        }
    }
}

impl FromStr for Interval {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1s" => Ok(Interval::Second1),
            "1m" => Ok(Interval::Minute1),
            "3m" => Ok(Interval::Minute3),
            "5m" => Ok(Interval::Minute5),
            "15m" => Ok(Interval::Minute15),
            "30m" => Ok(Interval::Minute30),
            "1h" => Ok(Interval::Hour1),
            "2h" => Ok(Interval::Hour2),
            "4h" => Ok(Interval::Hour4),
            "6h" => Ok(Interval::Hour6),
            "8h" => Ok(Interval::Hour8),
            "12h" => Ok(Interval::Hour12),
            "1d" => Ok(Interval::Day1),
            "3d" => Ok(Interval::Day3),
            "1w" => Ok(Interval::Week1),
            "1M" => Ok(Interval::Month1),
            _ => Err(SeriesError::Configuration(format!(
                "Unknown interval: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<String> for Interval {
    type Error = SeriesError;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        label.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.label().to_string()
    }
}

/// # Summary
/// 一条 K 线序列的身份：交易对 + 周期。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    // 交易对代码 (例如: BTCUSDT)
    pub symbol: String,
    // K 线周期
    pub interval: Interval,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_type_parse() {
        assert_eq!("spot".parse::<MarketType>().unwrap(), MarketType::Spot);
        assert_eq!("Futures".parse::<MarketType>().unwrap(), MarketType::Futures);
        assert!(matches!(
            "margin".parse::<MarketType>(),
            Err(SeriesError::Configuration(_))
        ));
        assert_eq!(MarketType::Futures.base_url(), FUTURES_KLINES_URL);
    }

    #[test]
    fn test_interval_label_round_trip() {
        for label in ["1s", "1m", "15m", "4h", "1d", "1w", "1M"] {
            let interval: Interval = label.parse().unwrap();
            assert_eq!(interval.to_string(), label);
        }
        assert_ne!("1m".parse::<Interval>().unwrap(), "1M".parse::<Interval>().unwrap());
        assert!("7m".parse::<Interval>().is_err());
    }

    #[test]
    fn test_interval_serializes_as_label() {
        assert_eq!(serde_json::to_value(Interval::Minute1).unwrap(), "1m");
        assert_eq!(serde_json::to_value(Interval::Month1).unwrap(), "1M");
        let key: SeriesKey =
            serde_json::from_str(r#"{"symbol": "ETHUSDT", "interval": "4h"}"#).unwrap();
        assert_eq!(key, SeriesKey::new("ETHUSDT", Interval::Hour4));
        assert!(serde_json::from_str::<Interval>(r#""Minute1""#).is_err());
    }

    #[test]
    fn test_interval_duration() {
        assert_eq!(Interval::Minute1.duration_ms(), 60_000);
        assert_eq!(Interval::Day1.duration_ms(), 86_400_000);
    }
}
