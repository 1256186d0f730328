use std::time::Duration;
use thiserror::Error;

/// # Summary
/// 行情源适配层错误，描述单次 HTTP 请求失败的原因。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - 只描述"这一次请求"的失败，不携带分页游标等领域状态。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    // 网络层错误，包含底层 HTTP 客户端错误信息
    #[error("Network error: {0}")]
    Network(String),
    // 请求超时（与网络错误同等对待）
    #[error("Request timed out")]
    Timeout,
    // 非 2xx 的 HTTP 状态码
    #[error("HTTP status {0}")]
    Status(u16),
    // 触发限频 (429 / 418)，可能携带服务端建议的等待时长
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    // 响应 JSON 结构与 12 字段数组约定不符
    #[error("Decode error: {0}")]
    Decode(String),
}

impl SourceError {
    /// # Summary
    /// 判断该错误是否值得在退避后重试。
    ///
    /// # Logic
    /// 1. 网络错误、超时、限频一律可重试。
    /// 2. 5xx 服务端错误可重试，4xx 客户端错误不可重试。
    /// 3. 解析错误说明响应结构有问题，重试无意义。
    ///
    /// # Returns
    /// 可重试返回 true。
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout | SourceError::RateLimited { .. } => {
                true
            }
            SourceError::Status(code) => *code >= 500,
            SourceError::Decode(_) => false,
        }
    }
}

/// # Summary
/// K 线序列领域错误枚举，覆盖配置、抓取、数据完整性与导出四类问题。
///
/// # Invariants
/// - `Configuration` 与 `InvalidRange` 只在构造阶段出现，永不重试。
/// - `FetchFailed` 必须携带可续传的游标。
/// - 过期 K 线的丢弃属于正常流程，不会产生任何错误。
#[derive(Error, Debug)]
pub enum SeriesError {
    // 非法的市场类型、周期、时间字符串或轮询参数
    #[error("Configuration error: {0}")]
    Configuration(String),
    // 时间区间不满足 start < end
    #[error("Invalid range: start {start} must be earlier than end {end}")]
    InvalidRange { start: i64, end: i64 },
    // 分页或轮询请求失败，cursor 为最后一次成功推进后的位置
    #[error("Fetch failed at cursor {cursor}: {source}")]
    FetchFailed {
        cursor: i64,
        #[source]
        source: SourceError,
    },
    // 数据违反有序 / 唯一 / 时间完整性约束
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    // 导出文件写入失败
    #[error("Export error: {0}")]
    Export(String),
}
