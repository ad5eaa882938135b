//! Storage contract for stock aggregates and its two implementations.
//!
//! | Store | Backing |
//! |-------|---------|
//! | [`MemoryStore`] | `HashMap` behind a tokio `RwLock`; tests and dry runs |
//! | [`WarehouseStore`] | DuckDB via `tickflow-warehouse`, blocking calls on `spawn_blocking` |

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tickflow_warehouse::{PointRecord, StockRecord, StoredStock, Warehouse, WarehouseError};
use tokio::sync::RwLock;

use crate::{Interval, Metadata, StockAggregate, Symbol, TimeSeriesPoint, Timestamp};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Append against a partition that was never created.
    #[error("no aggregate stored for {symbol} ({interval})")]
    AggregateMissing { symbol: Symbol, interval: Interval },

    #[error("aggregate for {symbol} ({interval}) already exists")]
    DuplicateAggregate { symbol: Symbol, interval: Interval },

    #[error(transparent)]
    Warehouse(WarehouseError),

    /// Stored data no longer maps onto domain types.
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Everything except a missing aggregate aborts a run.
    pub const fn escalates(&self) -> bool {
        !matches!(self, Self::AggregateMissing { .. })
    }
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence of stock aggregates, one partition per (symbol, interval).
pub trait AggregateStore: Send + Sync {
    fn find_aggregate<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
    ) -> StoreFuture<'a, Option<StockAggregate>>;

    /// Create all partitions or none; an existing partition is refused.
    fn create_aggregates(&self, aggregates: Vec<StockAggregate>) -> StoreFuture<'_, ()>;

    fn append_points<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        points: Vec<TimeSeriesPoint>,
    ) -> StoreFuture<'a, ()>;

    fn existing_timestamps<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
    ) -> StoreFuture<'a, HashSet<Timestamp>>;
}

type PartitionKey = (Symbol, Interval);

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<PartitionKey, StockAggregate>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl AggregateStore for MemoryStore {
    fn find_aggregate<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
    ) -> StoreFuture<'a, Option<StockAggregate>> {
        Box::pin(async move {
            let map = self.inner.read().await;
            Ok(map.get(&(symbol.clone(), interval)).cloned())
        })
    }

    fn create_aggregates(&self, aggregates: Vec<StockAggregate>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            let mut batch = HashSet::new();
            for aggregate in &aggregates {
                let key = (aggregate.symbol().clone(), aggregate.interval());
                if map.contains_key(&key) || !batch.insert(key) {
                    return Err(StoreError::DuplicateAggregate {
                        symbol: aggregate.symbol().clone(),
                        interval: aggregate.interval(),
                    });
                }
            }

            for aggregate in aggregates {
                map.insert(
                    (aggregate.symbol().clone(), aggregate.interval()),
                    aggregate,
                );
            }
            Ok(())
        })
    }

    fn append_points<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        points: Vec<TimeSeriesPoint>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            let key = (symbol.clone(), interval);
            let Some(existing) = map.remove(&key) else {
                return Err(StoreError::AggregateMissing {
                    symbol: symbol.clone(),
                    interval,
                });
            };

            // Stored points come first so they win over re-sent timestamps.
            let (metadata, mut merged) = existing.into_parts();
            merged.extend(points);
            map.insert(key, StockAggregate::new(metadata, merged));
            Ok(())
        })
    }

    fn existing_timestamps<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
    ) -> StoreFuture<'a, HashSet<Timestamp>> {
        Box::pin(async move {
            let map = self.inner.read().await;
            Ok(map
                .get(&(symbol.clone(), interval))
                .map(|aggregate| aggregate.points().iter().map(|p| p.timestamp).collect())
                .unwrap_or_default())
        })
    }
}

/// DuckDB-backed store.
#[derive(Clone)]
pub struct WarehouseStore {
    warehouse: Warehouse,
}

impl WarehouseStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Warehouse) -> Result<T, StoreError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || operation(warehouse))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for WarehouseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseStore")
            .field("db_path", &self.warehouse.db_path())
            .finish()
    }
}

impl AggregateStore for WarehouseStore {
    fn find_aggregate<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
    ) -> StoreFuture<'a, Option<StockAggregate>> {
        let owned = symbol.clone();
        Box::pin(self.blocking(move |warehouse| {
            warehouse
                .find_stock(owned.as_str(), interval.as_str())
                .map_err(StoreError::Warehouse)?
                .map(stored_to_aggregate)
                .transpose()
        }))
    }

    fn create_aggregates(&self, aggregates: Vec<StockAggregate>) -> StoreFuture<'_, ()> {
        Box::pin(self.blocking(move |warehouse| {
            let stored: Vec<StoredStock> = aggregates.iter().map(aggregate_to_stored).collect();
            warehouse
                .create_stocks(&stored)
                .map(|_| ())
                .map_err(from_warehouse)
        }))
    }

    fn append_points<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
        points: Vec<TimeSeriesPoint>,
    ) -> StoreFuture<'a, ()> {
        let owned = symbol.clone();
        Box::pin(self.blocking(move |warehouse| {
            let records: Vec<PointRecord> = points.iter().map(point_to_record).collect();
            warehouse
                .append_points(owned.as_str(), interval.as_str(), &records)
                .map(|_| ())
                .map_err(from_warehouse)
        }))
    }

    fn existing_timestamps<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: Interval,
    ) -> StoreFuture<'a, HashSet<Timestamp>> {
        let owned = symbol.clone();
        Box::pin(self.blocking(move |warehouse| {
            warehouse
                .existing_datetimes(owned.as_str(), interval.as_str())
                .map_err(StoreError::Warehouse)?
                .iter()
                .map(|raw| Timestamp::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string())))
                .collect()
        }))
    }
}

/// Lift the warehouse's partition errors into typed store errors.
fn from_warehouse(error: WarehouseError) -> StoreError {
    let partition = |symbol: &str, interval: &str| {
        Some((Symbol::parse(symbol).ok()?, interval.parse::<Interval>().ok()?))
    };

    match &error {
        WarehouseError::DuplicateStock { symbol, interval } => match partition(symbol, interval) {
            Some((symbol, interval)) => StoreError::DuplicateAggregate { symbol, interval },
            None => StoreError::Warehouse(error),
        },
        WarehouseError::StockNotFound { symbol, interval } => match partition(symbol, interval) {
            Some((symbol, interval)) => StoreError::AggregateMissing { symbol, interval },
            None => StoreError::Warehouse(error),
        },
        _ => StoreError::Warehouse(error),
    }
}

fn aggregate_to_stored(aggregate: &StockAggregate) -> StoredStock {
    let metadata = &aggregate.metadata;
    StoredStock {
        stock: StockRecord {
            symbol: metadata.symbol.as_str().to_owned(),
            interval: metadata.interval.as_str().to_owned(),
            instrument_type: metadata.instrument_type.clone(),
            currency: metadata.currency.clone(),
            exchange: metadata.exchange.clone(),
            exchange_timezone: metadata.exchange_timezone.clone(),
            mic_code: metadata.mic_code.clone(),
        },
        points: aggregate.points().iter().map(point_to_record).collect(),
    }
}

fn point_to_record(point: &TimeSeriesPoint) -> PointRecord {
    PointRecord {
        datetime: point.timestamp.format(),
        open: point.open,
        high: point.high,
        low: point.low,
        close: point.close,
        volume: point.volume,
    }
}

/// Map a stored partition back onto domain types.
pub fn stored_to_aggregate(stored: StoredStock) -> Result<StockAggregate, StoreError> {
    let corrupt = |e: crate::ValidationError| StoreError::Corrupt(e.to_string());
    let stock = stored.stock;
    let metadata = Metadata {
        symbol: Symbol::parse(&stock.symbol).map_err(corrupt)?,
        interval: stock.interval.parse().map_err(corrupt)?,
        instrument_type: stock.instrument_type,
        currency: stock.currency,
        exchange: stock.exchange,
        exchange_timezone: stock.exchange_timezone,
        mic_code: stock.mic_code,
    };

    let points = stored
        .points
        .into_iter()
        .map(|record| {
            TimeSeriesPoint::new(
                Timestamp::parse(&record.datetime)?,
                record.open,
                record.high,
                record.low,
                record.close,
                record.volume,
            )
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(corrupt)?;

    Ok(StockAggregate::new(metadata, points))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(symbol: &str, timestamps: &[&str]) -> StockAggregate {
        let symbol = Symbol::parse(symbol).expect("symbol");
        let points = timestamps
            .iter()
            .map(|ts| {
                TimeSeriesPoint::new(Timestamp::parse(ts).expect("ts"), 1.0, 1.0, 1.0, 1.0, 1)
                    .expect("point")
            })
            .collect();
        StockAggregate::new(
            Metadata {
                symbol,
                interval: Interval::OneHour,
                instrument_type: String::from("Common Stock"),
                currency: String::from("USD"),
                exchange: String::from("NYSE"),
                exchange_timezone: String::from("America/New_York"),
                mic_code: String::from("XNYS"),
            },
            points,
        )
    }

    #[tokio::test]
    async fn memory_store_refuses_duplicates_atomically() {
        let store = MemoryStore::new();
        store
            .create_aggregates(vec![aggregate("IBM", &["2024-05-02 10:00:00"])])
            .await
            .expect("create");

        let error = store
            .create_aggregates(vec![aggregate("KO", &[]), aggregate("IBM", &[])])
            .await
            .expect_err("duplicate");
        assert!(matches!(error, StoreError::DuplicateAggregate { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn memory_store_append_requires_partition() {
        let store = MemoryStore::new();
        let symbol = Symbol::parse("IBM").expect("symbol");
        let error = store
            .append_points(&symbol, Interval::OneHour, Vec::new())
            .await
            .expect_err("missing");
        assert!(matches!(error, StoreError::AggregateMissing { .. }));
        assert!(!error.escalates());
    }

    #[tokio::test]
    async fn memory_store_append_keeps_timestamps_unique() {
        let store = MemoryStore::new();
        let symbol = Symbol::parse("IBM").expect("symbol");
        store
            .create_aggregates(vec![aggregate("IBM", &["2024-05-02 10:00:00"])])
            .await
            .expect("create");

        let extra = aggregate("IBM", &["2024-05-02 10:00:00", "2024-05-02 11:00:00"])
            .into_parts()
            .1;
        store
            .append_points(&symbol, Interval::OneHour, extra)
            .await
            .expect("append");

        let timestamps = store
            .existing_timestamps(&symbol, Interval::OneHour)
            .await
            .expect("timestamps");
        assert_eq!(timestamps.len(), 2);
    }

    #[test]
    fn stored_partitions_map_back_onto_domain_types() {
        let original = aggregate("BRK.B", &["2024-05-02 11:00:00", "2024-05-02 10:00:00"]);
        let restored = stored_to_aggregate(aggregate_to_stored(&original)).expect("restored");
        assert_eq!(restored, original);
    }

    #[test]
    fn corrupt_rows_are_reported() {
        let mut stored = aggregate_to_stored(&aggregate("IBM", &[]));
        stored.stock.interval = String::from("3min");
        let error = stored_to_aggregate(stored).expect_err("corrupt");
        assert!(matches!(error, StoreError::Corrupt(_)));
        assert!(error.escalates());
    }
}
