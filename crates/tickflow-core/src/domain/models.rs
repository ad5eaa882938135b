use serde::{Deserialize, Serialize};

use crate::{Interval, Symbol, Timestamp, ValidationError};

/// Number of points requested per `time_series` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct OutputSize(u32);

impl OutputSize {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 5_000;

    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(ValidationError::OutputSizeOutOfRange {
                value,
                min: Self::MIN,
                max: Self::MAX,
            });
        }

        Ok(Self(value))
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for OutputSize {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OutputSize> for u32 {
    fn from(value: OutputSize) -> Self {
        value.0
    }
}

/// One unit of ingestion work: a (symbol, interval) partition and how much to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub symbol: Symbol,
    pub interval: Interval,
    pub output_size: OutputSize,
}

impl WorkItem {
    pub fn new(symbol: Symbol, interval: Interval, output_size: OutputSize) -> Self {
        Self {
            symbol,
            interval,
            output_size,
        }
    }
}

/// Provider metadata for a partition; `(symbol, interval)` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub symbol: Symbol,
    pub interval: Interval,
    pub instrument_type: String,
    pub currency: String,
    pub exchange: String,
    pub exchange_timezone: String,
    pub mic_code: String,
}

/// One OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl TimeSeriesPoint {
    pub fn new(
        timestamp: Timestamp,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        validate_finite("open", open)?;
        validate_finite("high", high)?;
        validate_finite("low", low)?;
        validate_finite("close", close)?;

        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// A partition's metadata with its points, ascending and unique by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAggregate {
    pub metadata: Metadata,
    points: Vec<TimeSeriesPoint>,
}

impl StockAggregate {
    /// Sorts the points and keeps the first occurrence of each timestamp.
    pub fn new(metadata: Metadata, mut points: Vec<TimeSeriesPoint>) -> Self {
        points.sort_by_key(|point| point.timestamp);
        points.dedup_by_key(|point| point.timestamp);
        Self { metadata, points }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.metadata.symbol
    }

    pub const fn interval(&self) -> Interval {
        self.metadata.interval
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn into_parts(self) -> (Metadata, Vec<TimeSeriesPoint>) {
        (self.metadata, self.points)
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}
