use crate::export;
use crate::snapshot::{normalize, verify_series};
use kline_core::common::SeriesKey;
use kline_core::common::time::display_ms;
use kline_core::market::entity::Kline;
use kline_core::market::error::SeriesError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// # Summary
/// 单根 K 线合并到序列后的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    // 新 K 线开盘，追加到末尾
    Appended,
    // 与最后一根同一开盘时间，替换（K 线仍在进行中）
    Replaced,
    // 早于最后一根，视为过期或乱序响应，丢弃
    Discarded,
}

/// # Summary
/// 有序、去重、并发安全的 K 线序列存储。
///
/// # Invariants
/// - 任何读者可见的时刻，序列都按 `open_time` 严格升序且键唯一。
/// - 锁只保护内存中的修改与拷贝，持锁期间不发生任何 I/O 或 `.await`。
/// - 永远不向外暴露内部容器的引用，读操作一律返回独立拷贝。
pub struct SeriesStore {
    // 序列身份，仅用于日志
    key: SeriesKey,
    // 规范化后的序列
    series: RwLock<Vec<Kline>>,
    // 是否已完成过一次完整回补
    backfilled: AtomicBool,
}

impl SeriesStore {
    /// 创建空序列存储。
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            series: RwLock::new(Vec::new()),
            backfilled: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    // 锁中毒时直接取回数据：所有写操作在持锁期间都是一次性替换或单元素修改，不会留下半成品状态
    fn read(&self) -> RwLockReadGuard<'_, Vec<Kline>> {
        self.series.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Kline>> {
        self.series.write().unwrap_or_else(|e| e.into_inner())
    }

    /// # Summary
    /// 以一批 K 线整体替换当前序列（回补提交）。
    ///
    /// # Logic
    /// 1. 在锁外完成规范化：排序、按开盘时间去重（保留最后一条）。
    /// 2. 校验每根 K 线的时间完整性与严格升序。
    /// 3. 持写锁一次性替换，并标记已回补。
    ///
    /// # Arguments
    /// * `records`: 待提交的 K 线。
    ///
    /// # Returns
    /// 成功返回提交后的序列长度；校验失败返回 `InvalidInput`，原序列保持不变。
    pub fn replace_all(&self, records: Vec<Kline>) -> Result<usize, SeriesError> {
        let incoming = records.len();
        let normalized = normalize(records);
        verify_series(&normalized)?;

        let len = normalized.len();
        *self.write() = normalized;
        self.backfilled.store(true, Ordering::Release);

        info!(
            "Series {} replaced: {} records committed ({} duplicates dropped)",
            self.key,
            len,
            incoming - len
        );
        Ok(len)
    }

    /// # Summary
    /// 将一根最新 K 线合并进序列。
    ///
    /// # Logic
    /// 1. 校验 `close_time > open_time`，不合法返回 `InvalidInput`。
    /// 2. 序列为空：直接追加。
    /// 3. 开盘时间大于最后一根：追加（新 K 线开盘）。
    /// 4. 开盘时间等于最后一根：替换（K 线仍在进行中，收盘价 / 成交量更新）。
    /// 5. 开盘时间小于最后一根：丢弃，记录告警，不作为错误返回。
    ///
    /// # Arguments
    /// * `record`: 轮询得到的最新 K 线。
    ///
    /// # Returns
    /// 返回合并结果。
    pub fn merge_latest(&self, record: Kline) -> Result<MergeOutcome, SeriesError> {
        record.validate()?;
        let open_time = record.open_time;

        let (outcome, last_open) = {
            let mut series = self.write();
            let last_open = series.last().map(|k| k.open_time);
            let outcome = match last_open {
                None => {
                    series.push(record);
                    MergeOutcome::Appended
                }
                Some(last) if open_time > last => {
                    series.push(record);
                    MergeOutcome::Appended
                }
                Some(last) if open_time == last => {
                    if let Some(slot) = series.last_mut() {
                        *slot = record;
                    }
                    MergeOutcome::Replaced
                }
                Some(_) => MergeOutcome::Discarded,
            };
            (outcome, last_open)
        };

        match outcome {
            MergeOutcome::Discarded => warn!(
                "Series {}: discarded stale kline {} (last stored {})",
                self.key,
                display_ms(open_time),
                last_open.map(display_ms).unwrap_or_default()
            ),
            _ => debug!(
                "Series {}: {:?} kline {}",
                self.key,
                outcome,
                display_ms(open_time)
            ),
        }
        Ok(outcome)
    }

    /// # Summary
    /// 获取序列的独立拷贝。
    ///
    /// # Logic
    /// 持读锁期间完成整体克隆，读者永远看不到写了一半的状态。
    pub fn snapshot(&self) -> Vec<Kline> {
        self.read().clone()
    }

    /// # Summary
    /// 导出规范化快照为 CSV 文件。
    ///
    /// # Logic
    /// 1. 取快照后立即释放锁。
    /// 2. 在锁外完成物化与文件写入。
    ///
    /// # Returns
    /// 成功返回写入行数。
    pub fn export(&self, path: &Path) -> Result<usize, SeriesError> {
        export::export_snapshot(self.snapshot(), path)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 最后一根 K 线的拷贝。
    pub fn last(&self) -> Option<Kline> {
        self.read().last().cloned()
    }

    pub fn last_close_time(&self) -> Option<i64> {
        self.read().last().map(|k| k.close_time)
    }

    /// 是否已有一次回补成功提交。
    pub fn is_backfilled(&self) -> bool {
        self.backfilled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kline_core::common::Interval;
    use kline_core::market::mock::sample_kline;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn store() -> SeriesStore {
        SeriesStore::new(SeriesKey::new("BTCUSDT", Interval::Minute1))
    }

    #[test]
    fn test_merge_into_empty_appends() {
        let store = store();
        assert_eq!(
            store.merge_latest(sample_kline(5_000, dec!(1))).unwrap(),
            MergeOutcome::Appended
        );
        assert_eq!(store.len(), 1);
        assert!(!store.is_backfilled());
    }

    #[test]
    fn test_merge_three_branches() {
        let store = store();
        store
            .replace_all(vec![sample_kline(0, dec!(1)), sample_kline(60_000, dec!(2))])
            .unwrap();

        // 相同开盘时间：替换
        assert_eq!(
            store.merge_latest(sample_kline(60_000, dec!(2.5))).unwrap(),
            MergeOutcome::Replaced
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().unwrap().close, dec!(2.5));

        // 更早的开盘时间：丢弃
        assert_eq!(
            store.merge_latest(sample_kline(0, dec!(7))).unwrap(),
            MergeOutcome::Discarded
        );
        assert_eq!(store.snapshot()[0].close, dec!(1));
        assert_eq!(store.len(), 2);

        // 更晚的开盘时间：追加
        assert_eq!(
            store.merge_latest(sample_kline(120_000, dec!(3))).unwrap(),
            MergeOutcome::Appended
        );
        assert_eq!(store.len(), 3);
        assert_eq!(store.last_close_time(), Some(179_999));
    }

    #[test]
    fn test_merge_rejects_inverted_record() {
        let store = store();
        let mut bad = sample_kline(60_000, dec!(1));
        bad.close_time = 60_000;
        assert!(matches!(
            store.merge_latest(bad),
            Err(SeriesError::InvalidInput(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_all_normalizes() {
        let store = store();
        let n = store
            .replace_all(vec![
                sample_kline(120_000, dec!(3)),
                sample_kline(0, dec!(1)),
                sample_kline(120_000, dec!(4)),
            ])
            .unwrap();
        assert_eq!(n, 2);
        let snap = store.snapshot();
        assert_eq!(snap[0].open_time, 0);
        assert_eq!(snap[1].close, dec!(4));
        assert!(store.is_backfilled());
    }

    #[test]
    fn test_replace_all_rejects_invalid_and_keeps_previous() {
        let store = store();
        store.replace_all(vec![sample_kline(0, dec!(1))]).unwrap();

        let mut bad = sample_kline(60_000, dec!(2));
        bad.close_time = 0;
        let result = store.replace_all(vec![sample_kline(120_000, dec!(1)), bad]);
        assert!(matches!(result, Err(SeriesError::InvalidInput(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].open_time, 0);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let store = store();
        store.merge_latest(sample_kline(0, dec!(1))).unwrap();
        let mut snap = store.snapshot();
        snap.clear();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_merge_and_snapshot_stay_ordered() {
        let store = Arc::new(store());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..2_000i64 {
                    // 每个开盘时间先追加再替换，再混入一次过期数据
                    store.merge_latest(sample_kline(i * 60_000, dec!(1))).unwrap();
                    store.merge_latest(sample_kline(i * 60_000, dec!(2))).unwrap();
                    if i > 0 {
                        store
                            .merge_latest(sample_kline((i - 1) * 60_000, dec!(9)))
                            .unwrap();
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = store.snapshot();
                        assert!(snap.windows(2).all(|w| w[0].open_time < w[1].open_time));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }

        let snap = store.snapshot();
        assert_eq!(snap.len(), 2_000);
        assert!(snap.iter().all(|k| k.close == dec!(2)));
    }
}
