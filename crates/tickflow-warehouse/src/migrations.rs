use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_stocks",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS stocks_id_seq START 1;

CREATE TABLE IF NOT EXISTS stocks (
    id BIGINT PRIMARY KEY DEFAULT nextval('stocks_id_seq'),
    symbol TEXT NOT NULL,
    bar_interval TEXT NOT NULL,
    instrument_type TEXT NOT NULL,
    currency TEXT NOT NULL,
    exchange TEXT NOT NULL,
    exchange_timezone TEXT NOT NULL,
    mic_code TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, bar_interval)
);

CREATE TABLE IF NOT EXISTS time_series (
    stock_id BIGINT NOT NULL,
    observed_at TIMESTAMP NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume UBIGINT NOT NULL,
    inserted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(stock_id, observed_at)
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_time_series_stock_observed_at ON time_series(stock_id, observed_at);
"#,
    },
];

/// Apply every migration not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}
