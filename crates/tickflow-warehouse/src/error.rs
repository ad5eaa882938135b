use thiserror::Error;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (creating the database directory).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A partition for this (symbol, interval) already exists.
    #[error("stock {symbol} ({interval}) already exists")]
    DuplicateStock { symbol: String, interval: String },

    /// No partition exists for this (symbol, interval).
    #[error("stock {symbol} ({interval}) does not exist")]
    StockNotFound { symbol: String, interval: String },

    /// Stored data could not be mapped back to records.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}
