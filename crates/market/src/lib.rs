//! # kline-market
//!
//! K 线序列的存储与采集编排：有序去重的并发安全存储、分页历史回补、
//! 增量轮询，以及面向下游的快照物化与 CSV 导出。

pub mod backfill;
pub mod export;
pub mod poller;
pub mod snapshot;
pub mod store;
