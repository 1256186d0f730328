//! # kline-core
//!
//! K 线采集系统的领域内核：实体、值类型、错误分类与数据源端口。
//! 本 crate 不做任何 I/O，具体的数据源与存储实现分别位于 `kline-feed` 与 `kline-market`。

pub mod common;
pub mod config;

pub mod market {
    pub mod entity;
    pub mod error;
    #[cfg(feature = "test-utils")]
    pub mod mock;
    pub mod port;
}
