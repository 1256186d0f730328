use crate::common::time::TimeRange;
use crate::common::{Interval, MarketType, SeriesKey};
use crate::market::error::SeriesError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局应用配置（原始形态，字段均可由配置文件或环境变量覆盖）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub poller: PollerConfig,
    pub retry: RetryConfig,
    pub backfill: BackfillConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub market_type: String,
    pub symbol: String,
    pub interval: String,
    // YYYY-MM-DD HH:MM:SS，按 UTC 解释
    pub start_time: String,
    // 缺省为当前时间
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub consecutive_failure_warn: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackfillConfig {
    pub page_pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExportConfig {
    pub path: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            market_type: "futures".to_string(),
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            start_time: "2024-06-01 00:00:00".to_string(),
            end_time: None,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            request_timeout_secs: 10,
            consecutive_failure_warn: 5,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// # Summary
/// 有界指数退避策略。
///
/// # Invariants
/// - `max_attempts >= 1`，包含首次请求。
/// - 第 n 次重试前的等待为 `min(initial * 2^(n-1), max)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// 不重试，只发一次请求。
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// # Summary
    /// 计算第 `retry` 次重试（从 1 开始）前的等待时长。
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    /// # Summary
    /// 重试用尽时单次调用的最长耗时。
    ///
    /// # Logic
    /// 每次请求都等满 `per_attempt`，再加上各次重试前的退避（限频等待同样受 `max_backoff` 约束）。
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        (1..self.max_attempts).fold(
            per_attempt.saturating_mul(self.max_attempts),
            |total, retry| total.saturating_add(self.backoff(retry)),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().to_policy()
    }
}

impl RetryConfig {
    fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }
}

/// # Summary
/// 校验后的强类型运行参数。
#[derive(Debug, Clone)]
pub struct Settings {
    pub market_type: MarketType,
    pub key: SeriesKey,
    pub range: TimeRange,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub consecutive_failure_warn: u32,
    pub retry: RetryPolicy,
    pub page_pause: Duration,
    pub export_path: Option<PathBuf>,
}

impl Settings {
    /// # Summary
    /// 单次轮询的总超时。
    ///
    /// # Logic
    /// 外层超时不小于数据源内部全部重试与退避的总耗时。
    pub fn poll_timeout(&self) -> Duration {
        self.retry.worst_case(self.request_timeout)
    }
}

impl AppConfig {
    /// # Summary
    /// 校验原始配置并转换为强类型参数。
    ///
    /// # Logic
    /// 1. 解析市场类型与周期，非法取值返回 `Configuration`。
    /// 2. 交易对不可为空。
    /// 3. 解析时间区间，先后顺序错误返回 `InvalidRange`。
    /// 4. 轮询间隔与请求超时必须大于 0。
    ///
    /// # Returns
    /// 成功返回 `Settings`，任何一项非法立即返回错误，不发起网络请求。
    pub fn validate(&self) -> Result<Settings, SeriesError> {
        let market_type: MarketType = self.source.market_type.parse()?;
        let interval: Interval = self.source.interval.parse()?;

        let symbol = self.source.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(SeriesError::Configuration("symbol must not be empty".into()));
        }

        let range = TimeRange::parse(&self.source.start_time, self.source.end_time.as_deref())?;

        if self.poller.interval_secs == 0 {
            return Err(SeriesError::Configuration(
                "poller.interval_secs must be greater than 0".into(),
            ));
        }
        if self.poller.request_timeout_secs == 0 {
            return Err(SeriesError::Configuration(
                "poller.request_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(Settings {
            market_type,
            key: SeriesKey::new(symbol, interval),
            range,
            poll_interval: Duration::from_secs(self.poller.interval_secs),
            request_timeout: Duration::from_secs(self.poller.request_timeout_secs),
            consecutive_failure_warn: self.poller.consecutive_failure_warn,
            retry: self.retry.to_policy(),
            page_pause: Duration::from_millis(self.backfill.page_pause_ms),
            export_path: self.export.path.as_ref().map(PathBuf::from),
        })
    }
}
