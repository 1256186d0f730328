use crate::store::{MergeOutcome, SeriesStore};
use kline_core::common::time::display_ms;
use kline_core::market::error::SeriesError;
use kline_core::market::port::KlineSource;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// # Summary
/// 轮询任务的状态机。
///
/// # Invariants
/// - 每轮转移路径为 `Fetching -> (Merged | Skipped | Failed)`，结果状态保留到下一轮 `Fetching`。
/// - `Idle` 既是初始状态，也是响应停止信号后的终止状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    // 追加或替换成功
    Merged,
    // 数据源暂无数据，或最新 K 线已过期被丢弃
    Skipped,
    // 请求失败、超时或数据不合法
    Failed,
}

/// # Summary
/// 轮询累计统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub merged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub consecutive_failures: u32,
}

/// # Summary
/// 轮询参数。
///
/// # Invariants
/// - `interval` 与 `request_timeout` 均大于 0，二者相互独立。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
    // 连续失败达到该次数时输出告警，0 表示不告警
    pub consecutive_failure_warn: u32,
}

impl PollerConfig {
    /// # Summary
    /// 构造并校验轮询参数。
    ///
    /// # Returns
    /// 任一时长为 0 时返回 `Configuration` 错误。
    pub fn new(interval: Duration, request_timeout: Duration) -> Result<Self, SeriesError> {
        if interval.is_zero() {
            return Err(SeriesError::Configuration(
                "polling interval must be greater than 0".into(),
            ));
        }
        if request_timeout.is_zero() {
            return Err(SeriesError::Configuration(
                "request timeout must be greater than 0".into(),
            ));
        }
        Ok(Self {
            interval,
            request_timeout,
            consecutive_failure_warn: 5,
        })
    }

    pub fn with_failure_warn(mut self, threshold: u32) -> Self {
        self.consecutive_failure_warn = threshold;
        self
    }
}

/// # Summary
/// 增量轮询器：按固定节奏拉取最新 K 线并合并到存储。
///
/// # Invariants
/// - 单次请求失败不会终止循环。
/// - 停止信号只在两次轮询之间检查，进行中的请求不会被打断。
/// - 网络请求期间不持有存储锁。
pub struct Poller {
    source: Arc<dyn KlineSource>,
    store: Arc<SeriesStore>,
    config: PollerConfig,
    stats: Arc<Mutex<PollStats>>,
}

impl Poller {
    pub fn new(source: Arc<dyn KlineSource>, store: Arc<SeriesStore>, config: PollerConfig) -> Self {
        Self {
            source,
            store,
            config,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    /// # Summary
    /// 执行一次轮询。
    ///
    /// # Logic
    /// 1. 在请求超时约束下获取最新 K 线，超时与失败同等处理。
    /// 2. 拿到数据则调用 `merge_latest`；空响应记为 `Skipped`。
    /// 3. 更新统计，连续失败达到阈值时告警。
    ///
    /// # Returns
    /// 本次轮询的结果状态（`Merged` / `Skipped` / `Failed`）。
    pub async fn poll_once(&self) -> PollState {
        let key = self.store.key();
        let fetched = tokio::time::timeout(
            self.config.request_timeout,
            self.source.fetch_latest(key),
        )
        .await;

        let outcome = match fetched {
            Err(_) => {
                warn!(
                    "Poll for {} timed out after {:?}",
                    key, self.config.request_timeout
                );
                PollState::Failed
            }
            Ok(Err(e)) => {
                warn!("Poll for {} failed: {}", key, e);
                PollState::Failed
            }
            Ok(Ok(None)) => {
                debug!("Poll for {} returned no data", key);
                PollState::Skipped
            }
            Ok(Ok(Some(kline))) => {
                let open_time = kline.open_time;
                match self.store.merge_latest(kline) {
                    Ok(MergeOutcome::Appended) | Ok(MergeOutcome::Replaced) => {
                        debug!("Poll for {} merged {}", key, display_ms(open_time));
                        PollState::Merged
                    }
                    Ok(MergeOutcome::Discarded) => PollState::Skipped,
                    Err(e) => {
                        error!("Poll for {} produced invalid kline: {}", key, e);
                        PollState::Failed
                    }
                }
            }
        };

        self.record(outcome);
        outcome
    }

    fn record(&self, outcome: PollState) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.cycles += 1;
        match outcome {
            PollState::Merged => stats.merged += 1,
            PollState::Skipped => stats.skipped += 1,
            PollState::Failed => stats.failed += 1,
            PollState::Idle | PollState::Fetching => {}
        }
        if outcome == PollState::Failed {
            stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
            let threshold = self.config.consecutive_failure_warn;
            if threshold > 0 && stats.consecutive_failures == threshold {
                warn!(
                    "Poll for {} failed {} times in a row, keeping last good series",
                    self.store.key(),
                    threshold
                );
            }
        } else {
            stats.consecutive_failures = 0;
        }
    }

    /// 当前累计统计。
    pub fn stats(&self) -> PollStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Summary
    /// 启动后台轮询任务。
    ///
    /// # Logic
    /// 1. 要求存储已完成一次回补提交，否则返回 `Configuration` 错误。
    /// 2. 创建停止信号与状态广播通道，`tokio::spawn` 轮询循环。
    ///
    /// # Returns
    /// 返回用于观察与停止任务的句柄。
    pub fn spawn(self) -> Result<PollerHandle, SeriesError> {
        if !self.store.is_backfilled() {
            return Err(SeriesError::Configuration(format!(
                "poller for {} started before backfill committed",
                self.store.key()
            )));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let stats = self.stats.clone();
        let task = tokio::spawn(self.run(stop_rx, state_tx));

        Ok(PollerHandle {
            stop_tx,
            state_rx,
            stats,
            task,
        })
    }

    /// # Summary
    /// 轮询主循环。
    ///
    /// # Logic
    /// 1. 等待下一个节拍或停止信号，以先到者为准；首个节拍立即触发。
    /// 2. 收到停止信号（或句柄被丢弃）时发布 `Idle` 并退出循环。
    /// 3. 否则发布 `Fetching`，执行一次完整轮询（期间不响应停止信号），再发布本轮结果。
    async fn run(self, mut stop_rx: watch::Receiver<bool>, state_tx: watch::Sender<PollState>) {
        let key = self.store.key().clone();
        info!(
            "Poller for {} started, every {:?}",
            key, self.config.interval
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            state_tx.send_replace(PollState::Fetching);
            let outcome = self.poll_once().await;
            state_tx.send_replace(outcome);
        }

        state_tx.send_replace(PollState::Idle);
        info!("Poller for {} stopped", key);
    }
}

/// # Summary
/// 后台轮询任务句柄。
///
/// # Invariants
/// - 句柄被丢弃时任务在下一个间隙自行退出。
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<PollState>,
    stats: Arc<Mutex<PollStats>>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// 当前状态。
    pub fn state(&self) -> PollState {
        *self.state_rx.borrow()
    }

    /// 订阅状态变化。
    pub fn subscribe_state(&self) -> watch::Receiver<PollState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> PollStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Summary
    /// 发送停止信号，不等待任务退出。
    ///
    /// # Logic
    /// 任务在当前轮询结束后的间隙观察到信号；若任务已退出则忽略。
    pub fn stop(&self) {
        if self.stop_tx.send(true).is_err() {
            debug!("Poller already stopped");
        }
    }

    /// # Summary
    /// 等待后台任务退出。
    ///
    /// # Logic
    /// 未发送停止信号时会一直等待，通常与 `stop` 配合使用。
    ///
    /// # Returns
    /// 返回最终统计。
    pub async fn join(self) -> PollStats {
        if let Err(e) = self.task.await {
            error!("Poller task ended abnormally: {}", e);
        }
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Summary
    /// 发送停止信号并等待任务退出，进行中的轮询会先完成。
    pub async fn shutdown(self) -> PollStats {
        self.stop();
        self.join().await
    }
}
