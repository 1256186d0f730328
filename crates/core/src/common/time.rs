use crate::market::error::SeriesError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 配置文件中时间字符串的格式，统一按 UTC 解释。
pub const CONFIG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// 导出文件中时间列的格式（保留毫秒，收盘时间通常为 xx:59.999）。
pub const EXPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// # Summary
/// 解析 `YYYY-MM-DD HH:MM:SS` 格式的 UTC 时间为毫秒时间戳。
///
/// # Logic
/// 1. 按 `CONFIG_TIME_FORMAT` 解析为无时区时间。
/// 2. 视为 UTC 并取毫秒时间戳。
///
/// # Arguments
/// * `s`: 时间字符串。
///
/// # Returns
/// 成功返回毫秒时间戳，格式错误返回 `SeriesError::Configuration`。
pub fn parse_utc_ms(s: &str) -> Result<i64, SeriesError> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), CONFIG_TIME_FORMAT).map_err(|e| {
        SeriesError::Configuration(format!(
            "time '{}' does not match {}: {}",
            s, CONFIG_TIME_FORMAT, e
        ))
    })?;
    Ok(naive.and_utc().timestamp_millis())
}

/// 毫秒时间戳转换为 UTC 时间，超出可表示范围时返回 `InvalidInput`。
pub fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>, SeriesError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| SeriesError::InvalidInput(format!("timestamp {} out of range", ms)))
}

/// 用于日志输出的时间渲染，非法时间戳原样输出数字。
pub fn display_ms(ms: i64) -> String {
    ms_to_datetime(ms)
        .map(|dt| dt.format(CONFIG_TIME_FORMAT).to_string())
        .unwrap_or_else(|_| ms.to_string())
}

/// 当前 UTC 毫秒时间戳。
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// # Summary
/// 半开时间区间 `[start_ms, end_ms)`，回补任务的输入。
///
/// # Invariants
/// - 只能通过 `TimeRange::new` 构造，保证 `start_ms < end_ms`，反序列化同样经过该校验。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start_ms: i64,
    end_ms: i64,
}

// 反序列化的中间形态，校验后才转为 TimeRange
#[derive(Deserialize)]
struct RawTimeRange {
    start_ms: i64,
    end_ms: i64,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = SeriesError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        TimeRange::new(raw.start_ms, raw.end_ms)
    }
}

impl TimeRange {
    /// # Summary
    /// 构造时间区间。
    ///
    /// # Returns
    /// 若 `start_ms >= end_ms` 返回 `SeriesError::InvalidRange`。
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self, SeriesError> {
        if start_ms >= end_ms {
            return Err(SeriesError::InvalidRange {
                start: start_ms,
                end: end_ms,
            });
        }
        Ok(Self { start_ms, end_ms })
    }

    /// # Summary
    /// 由配置中的两个时间字符串构造区间。
    ///
    /// # Logic
    /// 1. `end` 缺省时取当前时间。
    /// 2. 两端均按 UTC 解析，再校验先后顺序。
    pub fn parse(start: &str, end: Option<&str>) -> Result<Self, SeriesError> {
        let start_ms = parse_utc_ms(start)?;
        let end_ms = match end {
            Some(e) => parse_utc_ms(e)?,
            None => now_ms(),
        };
        Self::new(start_ms, end_ms)
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            display_ms(self.start_ms),
            display_ms(self.end_ms)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_utc_ms() {
        assert_eq!(parse_utc_ms("2024-06-01 00:00:00").unwrap(), 1_717_200_000_000);
        assert!(matches!(
            parse_utc_ms("2024/06/01"),
            Err(SeriesError::Configuration(_))
        ));
    }

    #[test]
    fn test_range_requires_start_before_end() {
        assert!(TimeRange::new(0, 1).is_ok());
        assert!(matches!(
            TimeRange::new(5, 5),
            Err(SeriesError::InvalidRange { start: 5, end: 5 })
        ));
        assert!(TimeRange::parse("2024-10-23 00:00:00", Some("2024-06-01 00:00:00")).is_err());
    }

    #[test]
    fn test_range_deserialize_is_validated() {
        let range: TimeRange =
            serde_json::from_str(r#"{"start_ms": 0, "end_ms": 60000}"#).unwrap();
        assert_eq!(range, TimeRange::new(0, 60_000).unwrap());
        assert_eq!(
            serde_json::to_value(range).unwrap(),
            serde_json::json!({"start_ms": 0, "end_ms": 60000})
        );

        assert!(serde_json::from_str::<TimeRange>(r#"{"start_ms": 5, "end_ms": 5}"#).is_err());
        assert!(serde_json::from_str::<TimeRange>(r#"{"start_ms": 9, "end_ms": 1}"#).is_err());
    }

    #[test]
    fn test_display_ms() {
        assert_eq!(display_ms(1_717_200_000_000), "2024-06-01 00:00:00");
    }
}
