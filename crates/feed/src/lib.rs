//! # kline-feed
//!
//! `KlineSource` 的交易所 REST 适配器。

pub mod binance;
