use serde::Serialize;

/// Partition metadata for one (symbol, interval) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockRecord {
    pub symbol: String,
    /// Provider interval name (e.g. `1min`, `1day`).
    pub interval: String,
    pub instrument_type: String,
    pub currency: String,
    pub exchange: String,
    pub exchange_timezone: String,
    pub mic_code: String,
}

/// One stored observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRecord {
    /// Exchange-local wall clock, `YYYY-MM-DD HH:MM:SS`.
    pub datetime: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A partition together with its observations, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredStock {
    pub stock: StockRecord,
    pub points: Vec<PointRecord>,
}

/// Row of the `stocks` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockSummary {
    pub symbol: String,
    pub interval: String,
    pub point_count: u64,
    pub first_datetime: Option<String>,
    pub last_datetime: Option<String>,
}
