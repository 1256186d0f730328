use async_trait::async_trait;
use kline_core::common::{MarketType, SeriesKey};
use kline_core::config::RetryPolicy;
use kline_core::market::entity::Kline;
use kline_core::market::error::{SeriesError, SourceError};
use kline_core::market::port::KlineSource;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// 单根 K 线数组的字段个数
const KLINE_FIELDS: usize = 12;

/// # Summary
/// 币安 klines 接口行情提供者实现。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端进行通讯，每个请求受客户端超时约束。
/// - 可重试错误按 `RetryPolicy` 做有界指数退避，限频时优先遵循 `Retry-After`。
/// - 任何一次等待都不超过 `RetryPolicy::max_backoff`。
#[derive(Clone)]
pub struct BinanceProvider {
    /// 内部使用的 HTTP 客户端
    client: Client,
    /// klines 接口完整地址
    base_url: String,
    /// 重试策略
    retry: RetryPolicy,
}

impl BinanceProvider {
    /// # Summary
    /// 按市场类型创建提供者。
    ///
    /// # Logic
    /// 1. 由 `MarketType` 选定现货或合约接口地址。
    /// 2. 构建带超时的 HTTP 客户端。
    ///
    /// # Arguments
    /// * `market_type`: 市场类型。
    /// * `request_timeout`: 单个请求的超时时长，与轮询间隔相互独立。
    /// * `retry`: 重试策略。
    ///
    /// # Returns
    /// 成功返回提供者实例，客户端构建失败返回 `Configuration` 错误。
    pub fn new(
        market_type: MarketType,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, SeriesError> {
        Self::with_base_url(market_type.base_url(), request_timeout, retry)
    }

    /// # Summary
    /// 使用自定义接口地址创建提供者（镜像站点或测试服务器）。
    ///
    /// # Logic
    /// 1. 确保 rustls 加密后端已安装。
    /// 2. 配置超时与 User-Agent 并构建客户端。
    pub fn with_base_url(
        base_url: impl Into<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, SeriesError> {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("kline-feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SeriesError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            retry,
        })
    }

    /// 当前使用的接口地址。
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// # Summary
    /// 带退避重试地请求 klines 接口。
    ///
    /// # Logic
    /// 1. 发起一次请求，成功立即返回。
    /// 2. 失败且可重试、且未用尽次数时，按策略等待后重试。
    /// 3. 限频响应携带 `Retry-After` 时，以服务端建议为准，但不超过 `max_backoff`。
    async fn get_klines(&self, params: &[(&str, String)]) -> Result<Vec<Kline>, SourceError> {
        let mut attempt = 1;
        loop {
            match self.request_once(params).await {
                Ok(klines) => return Ok(klines),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let wait = match &e {
                        SourceError::RateLimited {
                            retry_after: Some(after),
                        } => (*after).min(self.retry.max_backoff),
                        _ => self.retry.backoff(attempt),
                    };
                    warn!(
                        "klines request failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt, self.retry.max_attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 单次请求，不做任何重试。
    async fn request_once(&self, params: &[(&str, String)]) -> Result<Vec<Kline>, SourceError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SourceError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let json: Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Decode(e.to_string())
            }
        })?;

        decode_klines(&json)
    }
}

/// reqwest 错误归类：超时单独识别，其余视为网络错误。
fn classify_reqwest_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Network(e.to_string())
    }
}

#[async_trait]
impl KlineSource for BinanceProvider {
    /// # Summary
    /// 抓取一页历史 K 线。
    ///
    /// # Logic
    /// 1. 构建 symbol / interval / startTime / endTime / limit 查询参数。
    /// 2. 请求并解码，保持接口返回顺序。
    async fn fetch_page(
        &self,
        key: &SeriesKey,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Kline>, SourceError> {
        let params = [
            ("symbol", key.symbol.clone()),
            ("interval", key.interval.to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", limit.to_string()),
        ];
        self.get_klines(&params).await
    }

    /// # Summary
    /// 抓取最新一根 K 线。
    ///
    /// # Logic
    /// 1. 不带时间窗口，`limit=1`。
    /// 2. 空数组视为暂无数据。
    async fn fetch_latest(&self, key: &SeriesKey) -> Result<Option<Kline>, SourceError> {
        let params = [
            ("symbol", key.symbol.clone()),
            ("interval", key.interval.to_string()),
            ("limit", "1".to_string()),
        ];
        let mut klines = self.get_klines(&params).await?;
        Ok(klines.pop())
    }
}

/// # Summary
/// 将接口响应解码为 K 线列表。
///
/// # Logic
/// 1. 顶层必须是数组。
/// 2. 每个元素必须是恰好 12 个字段的数组，逐字段按固定位置解码。
/// 3. 任意字段类型不符即整体失败，不做部分接受。
///
/// # Returns
/// 成功返回 K 线列表，结构不符返回 `SourceError::Decode`。
pub fn decode_klines(json: &Value) -> Result<Vec<Kline>, SourceError> {
    let rows = json
        .as_array()
        .ok_or_else(|| SourceError::Decode(format!("expected array, got {}", type_name(json))))?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| decode_row(i, row))
        .collect()
}

fn decode_row(index: usize, row: &Value) -> Result<Kline, SourceError> {
    let fields = row
        .as_array()
        .ok_or_else(|| SourceError::Decode(format!("row {}: expected array", index)))?;
    if fields.len() != KLINE_FIELDS {
        return Err(SourceError::Decode(format!(
            "row {}: expected {} fields, got {}",
            index,
            KLINE_FIELDS,
            fields.len()
        )));
    }

    let row = RowDecoder { index, fields };
    Ok(Kline {
        open_time: row.int(0, "open_time")?,
        open: row.decimal(1, "open")?,
        high: row.decimal(2, "high")?,
        low: row.decimal(3, "low")?,
        close: row.decimal(4, "close")?,
        volume: row.decimal(5, "volume")?,
        close_time: row.int(6, "close_time")?,
        quote_asset_volume: row.decimal(7, "quote_asset_volume")?,
        num_trades: row.count(8, "num_trades")?,
        taker_buy_base_volume: row.decimal(9, "taker_buy_base_volume")?,
        taker_buy_quote_volume: row.decimal(10, "taker_buy_quote_volume")?,
        ignore: row.opaque(11),
    })
}

struct RowDecoder<'a> {
    index: usize,
    fields: &'a [Value],
}

impl RowDecoder<'_> {
    fn field(&self, pos: usize) -> &Value {
        &self.fields[pos]
    }

    fn err(&self, name: &str, value: &Value) -> SourceError {
        SourceError::Decode(format!(
            "row {}: field {} has unexpected value {}",
            self.index, name, value
        ))
    }

    fn int(&self, pos: usize, name: &str) -> Result<i64, SourceError> {
        let v = self.field(pos);
        v.as_i64().ok_or_else(|| self.err(name, v))
    }

    fn count(&self, pos: usize, name: &str) -> Result<u64, SourceError> {
        let v = self.field(pos);
        v.as_u64().ok_or_else(|| self.err(name, v))
    }

    // 价格与成交量通常以字符串下发，偶尔为数字，两者都按文本解析以避免浮点误差
    fn decimal(&self, pos: usize, name: &str) -> Result<Decimal, SourceError> {
        let v = self.field(pos);
        let text = match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return Err(self.err(name, v)),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|_| self.err(name, v))
    }

    fn opaque(&self, pos: usize) -> String {
        match self.field(pos) {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw_row(open_time: i64) -> Value {
        json!([
            open_time,
            "61000.10",
            "61050.00",
            "60990.00",
            "61020.50",
            "12.345",
            open_time + 59_999,
            "753000.12",
            321,
            "6.1",
            "372000.00",
            "0"
        ])
    }

    #[test]
    fn test_decode_valid_rows() {
        let json = json!([raw_row(1_717_200_000_000), raw_row(1_717_200_060_000)]);
        let klines = decode_klines(&json).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1_717_200_000_000);
        assert_eq!(klines[0].close_time, 1_717_200_059_999);
        assert_eq!(klines[0].open, dec!(61000.10));
        assert_eq!(klines[0].close, dec!(61020.50));
        assert_eq!(klines[0].num_trades, 321);
        assert_eq!(klines[0].ignore, "0");
    }

    #[test]
    fn test_decode_numeric_decimals() {
        let json = json!([[0, 1.5, 2, 1, "1.25", "3", 59_999, "0", 0, "0", "0", 0]]);
        let klines = decode_klines(&json).unwrap();
        assert_eq!(klines[0].open, dec!(1.5));
        assert_eq!(klines[0].high, dec!(2));
        assert_eq!(klines[0].ignore, "0");
    }

    #[test]
    fn test_decode_empty_array() {
        assert!(decode_klines(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_error_object() {
        let json = json!({"code": -1121, "msg": "Invalid symbol."});
        assert!(matches!(decode_klines(&json), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_short_row() {
        let json = json!([[0, "1", "1", "1", "1", "1", 59_999]]);
        assert!(matches!(decode_klines(&json), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_bad_price() {
        let mut row = raw_row(0);
        row[4] = json!("not-a-price");
        assert!(matches!(
            decode_klines(&json!([row])),
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_string_timestamp() {
        let mut row = raw_row(0);
        row[0] = json!("1717200000000");
        assert!(matches!(
            decode_klines(&json!([row])),
            Err(SourceError::Decode(_))
        ));
    }
}
