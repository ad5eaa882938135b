//! # Tickflow Warehouse
//!
//! DuckDB-backed storage for stock aggregates.
//!
//! A stock aggregate is one (symbol, interval) partition: a row in `stocks`
//! holding the provider metadata, plus its observations in `time_series`
//! keyed by `(stock_id, observed_at)`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickflow_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!
//!     if let Some(stored) = warehouse.find_stock("AAPL", "1min")? {
//!         println!("{} points stored", stored.points.len());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `stocks` | One row per (symbol, interval) partition with provider metadata |
//! | `time_series` | OHLCV observations per partition |
//! | `schema_migrations` | Applied migration versions |
//!
//! All values are bound as parameters; nothing user-supplied is interpolated
//! into SQL text.

pub mod duckdb;
pub mod error;
pub mod migrations;
pub mod models;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, OptionalExt, ToSql};

pub use crate::duckdb::{Checkout, ConnectionPool};
pub use error::WarehouseError;
pub use models::{PointRecord, StockRecord, StockSummary, StoredStock};

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at(resolve_tickflow_home().join("warehouse.duckdb"))
    }
}

impl WarehouseConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: 4,
        }
    }
}

/// Storage of stock aggregates.
#[derive(Clone)]
pub struct Warehouse {
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open (creating if needed) the database and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let pool = ConnectionPool::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.checkout()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    /// Load a partition and all of its points, oldest first.
    pub fn find_stock(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Option<StoredStock>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let Some((stock_id, stock)) = read_stock(&connection, symbol, interval)? else {
            return Ok(None);
        };

        let points = read_points(&connection, stock_id, None)?;
        Ok(Some(StoredStock { stock, points }))
    }

    /// Create new partitions with their initial points in one transaction.
    ///
    /// Fails with [`WarehouseError::DuplicateStock`] (and writes nothing) if any
    /// partition already exists.
    pub fn create_stocks(&self, stocks: &[StoredStock]) -> Result<usize, WarehouseError> {
        if stocks.is_empty() {
            return Ok(0);
        }

        let connection = self.pool.checkout()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for stored in stocks {
                let stock = &stored.stock;
                if lookup_stock_id(&connection, &stock.symbol, &stock.interval)?.is_some() {
                    return Err(WarehouseError::DuplicateStock {
                        symbol: stock.symbol.clone(),
                        interval: stock.interval.clone(),
                    });
                }

                let params: [&dyn ToSql; 7] = [
                    &stock.symbol,
                    &stock.interval,
                    &stock.instrument_type,
                    &stock.currency,
                    &stock.exchange,
                    &stock.exchange_timezone,
                    &stock.mic_code,
                ];
                let stock_id: i64 = connection.query_row(
                    "INSERT INTO stocks \
                     (symbol, bar_interval, instrument_type, currency, exchange, exchange_timezone, mic_code) \
                     VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
                    params.as_slice(),
                    |row| row.get(0),
                )?;

                insert_points(&connection, stock_id, &stored.points)?;
            }

            Ok(stocks.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Append points to an existing partition. Returns the number of rows written;
    /// points whose timestamp is already stored are ignored.
    pub fn append_points(
        &self,
        symbol: &str,
        interval: &str,
        points: &[PointRecord],
    ) -> Result<usize, WarehouseError> {
        let connection = self.pool.checkout()?;
        let Some(stock_id) = lookup_stock_id(&connection, symbol, interval)? else {
            return Err(WarehouseError::StockNotFound {
                symbol: symbol.to_owned(),
                interval: interval.to_owned(),
            });
        };

        if points.is_empty() {
            return Ok(0);
        }

        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = insert_points(&connection, stock_id, points);
        finalize_transaction(&connection, result)
    }

    /// Stored observation datetimes of a partition (empty if the partition is missing).
    pub fn existing_datetimes(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<String>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let mut statement = connection.prepare(
            "SELECT strftime(t.observed_at, '%Y-%m-%d %H:%M:%S') \
             FROM time_series t JOIN stocks s ON s.id = t.stock_id \
             WHERE s.symbol = ? AND s.bar_interval = ? \
             ORDER BY t.observed_at",
        )?;
        let rows = statement.query_map([symbol, interval], |row| row.get::<_, String>(0))?;

        let mut datetimes = Vec::new();
        for row in rows {
            datetimes.push(row?);
        }
        Ok(datetimes)
    }

    /// The newest `limit` points of a partition, oldest first.
    pub fn latest_points(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Option<StoredStock>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let Some((stock_id, stock)) = read_stock(&connection, symbol, interval)? else {
            return Ok(None);
        };

        let points = read_points(&connection, stock_id, Some(limit))?;
        Ok(Some(StoredStock { stock, points }))
    }

    /// Every stored partition with its point count and datetime range.
    pub fn list_stocks(&self) -> Result<Vec<StockSummary>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let mut statement = connection.prepare(
            "SELECT s.symbol, s.bar_interval, COUNT(t.observed_at), \
                    strftime(MIN(t.observed_at), '%Y-%m-%d %H:%M:%S'), \
                    strftime(MAX(t.observed_at), '%Y-%m-%d %H:%M:%S') \
             FROM stocks s LEFT JOIN time_series t ON t.stock_id = s.id \
             GROUP BY s.symbol, s.bar_interval \
             ORDER BY s.symbol, s.bar_interval",
        )?;
        let rows = statement.query_map([], |row| {
            let count: i64 = row.get(2)?;
            Ok(StockSummary {
                symbol: row.get(0)?,
                interval: row.get(1)?,
                point_count: u64::try_from(count).unwrap_or_default(),
                first_datetime: row.get(3)?,
                last_datetime: row.get(4)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

fn lookup_stock_id(
    connection: &Connection,
    symbol: &str,
    interval: &str,
) -> Result<Option<i64>, WarehouseError> {
    let id = connection
        .query_row(
            "SELECT id FROM stocks WHERE symbol = ? AND bar_interval = ?",
            [symbol, interval],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn read_stock(
    connection: &Connection,
    symbol: &str,
    interval: &str,
) -> Result<Option<(i64, StockRecord)>, WarehouseError> {
    let row = connection
        .query_row(
            "SELECT id, symbol, bar_interval, instrument_type, currency, exchange, \
                    exchange_timezone, mic_code \
             FROM stocks WHERE symbol = ? AND bar_interval = ?",
            [symbol, interval],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    StockRecord {
                        symbol: row.get(1)?,
                        interval: row.get(2)?,
                        instrument_type: row.get(3)?,
                        currency: row.get(4)?,
                        exchange: row.get(5)?,
                        exchange_timezone: row.get(6)?,
                        mic_code: row.get(7)?,
                    },
                ))
            },
        )
        .optional()?;
    Ok(row)
}

fn read_points(
    connection: &Connection,
    stock_id: i64,
    limit: Option<usize>,
) -> Result<Vec<PointRecord>, WarehouseError> {
    // Newest-first with a limit, then flipped so callers always see oldest first.
    let limit = match limit {
        Some(limit) => i64::try_from(limit).map_err(|_| WarehouseError::CorruptRow {
            table: "time_series",
            reason: format!("limit {limit} out of range"),
        })?,
        None => i64::MAX,
    };

    let mut statement = connection.prepare(
        "SELECT strftime(observed_at, '%Y-%m-%d %H:%M:%S'), open, high, low, close, volume \
         FROM time_series WHERE stock_id = ? \
         ORDER BY observed_at DESC LIMIT ?",
    )?;
    let params: [&dyn ToSql; 2] = [&stock_id, &limit];
    let rows = statement.query_map(params.as_slice(), |row| {
        Ok(PointRecord {
            datetime: row.get(0)?,
            open: row.get(1)?,
            high: row.get(2)?,
            low: row.get(3)?,
            close: row.get(4)?,
            volume: row.get(5)?,
        })
    })?;

    let mut points = Vec::new();
    for row in rows {
        points.push(row?);
    }
    points.reverse();
    Ok(points)
}

fn insert_points(
    connection: &Connection,
    stock_id: i64,
    points: &[PointRecord],
) -> Result<usize, WarehouseError> {
    let mut written = 0;
    for point in points {
        let params: [&dyn ToSql; 7] = [
            &stock_id,
            &point.datetime,
            &point.open,
            &point.high,
            &point.low,
            &point.close,
            &point.volume,
        ];
        written += connection.execute(
            "INSERT OR IGNORE INTO time_series \
             (stock_id, observed_at, open, high, low, close, volume) \
             VALUES (?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
    }
    Ok(written)
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the tickflow home directory from environment or default.
fn resolve_tickflow_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKFLOW_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickflow");
    }

    PathBuf::from(".tickflow")
}
