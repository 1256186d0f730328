use crate::store::SeriesStore;
use kline_core::common::time::{TimeRange, display_ms};
use kline_core::market::entity::Kline;
use kline_core::market::error::SeriesError;
use kline_core::market::port::{KlineSource, PAGE_LIMIT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// # Summary
/// 一次成功回补的统计信息。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    // 本次运行发出的分页请求数
    pub pages: usize,
    // 累计抓取的原始 K 线条数（含续传前已抓取的部分）
    pub fetched: usize,
    // 规范化后提交到存储的条数
    pub committed: usize,
}

/// # Summary
/// 未提交的回补进度：下一页的起点与已抓取的数据。
///
/// # Invariants
/// - `buffer` 中的数据全部早于 `cursor`，续传时原样保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillProgress {
    pub cursor: i64,
    pub buffer: Vec<Kline>,
}

/// # Summary
/// 一次性分页历史回补任务。
///
/// # Invariants
/// - 永远不会发出 `startTime >= endTime` 的请求。
/// - 只有全部分页成功后才整体提交到存储，中途失败不产生任何部分提交。
/// - 失败后保留已抓取的数据与游标，再次调用 `run` 即从游标处续传；
///   也可通过 `into_progress` / `resume` 交给新的任务续传。
pub struct Backfill {
    // 原始数据源
    source: Arc<dyn KlineSource>,
    // 目标存储
    store: Arc<SeriesStore>,
    // 回补区间 [start, end)
    range: TimeRange,
    // 相邻分页之间的停顿，用于减轻限频压力
    page_pause: Duration,
    // 下一页的起点
    cursor: i64,
    // 已抓取尚未提交的数据
    buffer: Vec<Kline>,
}

impl Backfill {
    /// # Summary
    /// 创建回补任务。
    ///
    /// # Arguments
    /// * `source`: 数据源驱动。
    /// * `store`: 目标序列存储。
    /// * `range`: 已校验的时间区间。
    pub fn new(source: Arc<dyn KlineSource>, store: Arc<SeriesStore>, range: TimeRange) -> Self {
        Self {
            source,
            store,
            cursor: range.start_ms(),
            range,
            page_pause: Duration::ZERO,
            buffer: Vec::new(),
        }
    }

    /// # Summary
    /// 从先前失败的进度续传。
    ///
    /// # Logic
    /// 1. 校验游标落在 `[range.start, range.end]` 内。
    /// 2. 沿用已抓取的数据，下一页从 `progress.cursor` 开始。
    ///
    /// # Returns
    /// 游标越界返回 `InvalidInput`。
    pub fn resume(
        source: Arc<dyn KlineSource>,
        store: Arc<SeriesStore>,
        range: TimeRange,
        progress: BackfillProgress,
    ) -> Result<Self, SeriesError> {
        if progress.cursor < range.start_ms() || progress.cursor > range.end_ms() {
            return Err(SeriesError::InvalidInput(format!(
                "resume cursor {} outside backfill range {}",
                progress.cursor, range
            )));
        }
        Ok(Self {
            source,
            store,
            cursor: progress.cursor,
            range,
            page_pause: Duration::ZERO,
            buffer: progress.buffer,
        })
    }

    /// 交出未提交的进度，供另一个回补任务续传。
    pub fn into_progress(self) -> BackfillProgress {
        BackfillProgress {
            cursor: self.cursor,
            buffer: self.buffer,
        }
    }

    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    /// 下一页请求的起点；失败后即为可续传的游标。
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// 已抓取但尚未提交的条数。
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// # Summary
    /// 执行（或续传）回补并提交到存储。
    ///
    /// # Logic
    /// 1. 以游标为起点、区间终点为终点请求一页，`limit` 固定为 1000。
    /// 2. 非空页追加到缓冲区，游标推进到最后一根的 `close_time + 1`。
    /// 3. 出现以下任一情况即停止：游标到达终点、空页、页长不足 1000、游标未能前进。
    /// 4. 剔除开盘时间落在区间终点之后的 K 线，整体提交至 `SeriesStore::replace_all`。
    /// 5. 提交完成后重置游标，再次运行即为一次完整的重新回补。
    ///
    /// # Returns
    /// 成功返回统计信息；分页失败返回携带游标的 `FetchFailed`，存储保持不变。
    pub async fn run(&mut self) -> Result<BackfillReport, SeriesError> {
        let key = self.store.key().clone();
        let end = self.range.end_ms();
        let remaining_bars = end.saturating_sub(self.cursor) / key.interval.duration_ms();
        info!(
            "Backfill for {} over {} starting at {} (~{} bars)",
            key,
            self.range,
            display_ms(self.cursor),
            remaining_bars
        );

        let mut pages = 0;
        while self.cursor < end {
            if pages > 0 && !self.page_pause.is_zero() {
                tokio::time::sleep(self.page_pause).await;
            }

            info!("下载数据 (UTC): {}", display_ms(self.cursor));
            let page = self
                .source
                .fetch_page(&key, self.cursor, end, PAGE_LIMIT)
                .await
                .map_err(|source| SeriesError::FetchFailed {
                    cursor: self.cursor,
                    source,
                })?;
            pages += 1;

            let Some(next) = page.last().map(|k| k.close_time.saturating_add(1)) else {
                debug!("Backfill for {}: empty page, history exhausted", key);
                break;
            };
            let page_len = page.len();
            self.buffer.extend(page);

            if next <= self.cursor {
                warn!(
                    "Backfill for {}: cursor did not advance past {}, stopping",
                    key,
                    display_ms(self.cursor)
                );
                break;
            }
            self.cursor = next;

            if page_len < PAGE_LIMIT {
                debug!("Backfill for {}: short page ({}), history exhausted", key, page_len);
                break;
            }
        }

        let mut records = std::mem::take(&mut self.buffer);
        self.cursor = self.range.start_ms();

        let fetched = records.len();
        records.retain(|k| k.open_time < end);
        if records.len() < fetched {
            debug!(
                "Backfill for {}: dropped {} klines opening at or after range end",
                key,
                fetched - records.len()
            );
        }

        let committed = self.store.replace_all(records)?;
        info!(
            "Backfill for {} complete: {} pages, {} fetched, {} committed",
            key, pages, fetched, committed
        );
        Ok(BackfillReport {
            pages,
            fetched,
            committed,
        })
    }
}
