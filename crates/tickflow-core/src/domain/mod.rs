//! # Domain Models
//!
//! Strongly-typed values for the ingestion pipeline. Construction validates
//! every invariant, so a [`WorkItem`] or [`StockAggregate`] in hand is always
//! well formed.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated ticker (`AAPL`, `BRK.B`, `EUR/USD`) |
//! | [`Interval`] | Closed set of provider bar intervals |
//! | [`Timestamp`] | Exchange-local wall-clock datetime; the dedup key |
//! | [`OutputSize`] | Points requested per call, `1..=5000` |
//! | [`WorkItem`] | (symbol, interval, output size) unit of work |
//! | [`Metadata`] | Provider metadata of a partition |
//! | [`TimeSeriesPoint`] | One OHLCV observation |
//! | [`StockAggregate`] | Metadata plus ascending, unique points |

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::Interval;
pub use models::{Metadata, OutputSize, StockAggregate, TimeSeriesPoint, WorkItem};
pub use symbol::Symbol;
pub use timestamp::Timestamp;
