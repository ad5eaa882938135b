//! Behavior tests for the DuckDB-backed aggregate store.

mod support;

use std::sync::Arc;

use tempfile::TempDir;
use tickflow_core::shutdown;
use tickflow_core::{
    AggregateStore, Interval, Metadata, Orchestrator, StockAggregate, StoreError, Symbol,
    TimeSeriesPoint, Timestamp, WarehouseStore,
};
use tickflow_warehouse::{Warehouse, WarehouseConfig};

use support::{gateway, item, roomy_bucket, series, ScriptedProvider};

fn open_store() -> (TempDir, WarehouseStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::at(dir.path().join("warehouse.duckdb")))
        .expect("open warehouse");
    (dir, WarehouseStore::new(warehouse))
}

fn aapl() -> Symbol {
    Symbol::parse("AAPL").expect("symbol")
}

fn point(datetime: &str, close: f64, volume: u64) -> TimeSeriesPoint {
    TimeSeriesPoint::new(
        Timestamp::parse(datetime).expect("timestamp"),
        close - 0.5,
        close + 1.0,
        close - 1.0,
        close,
        volume,
    )
    .expect("finite point")
}

fn aggregate(points: Vec<TimeSeriesPoint>) -> StockAggregate {
    StockAggregate::new(
        Metadata {
            symbol: aapl(),
            interval: Interval::OneMinute,
            instrument_type: String::from("Common Stock"),
            currency: String::from("USD"),
            exchange: String::from("NASDAQ"),
            exchange_timezone: String::from("America/New_York"),
            mic_code: String::from("XNGS"),
        },
        points,
    )
}

// =============================================================================
// Storage Contract
// =============================================================================

#[tokio::test]
async fn created_aggregates_read_back_with_metadata_and_ordered_points() {
    let (_dir, store) = open_store();
    let created = aggregate(vec![
        point("2024-05-02 15:59:00", 172.95, 120_034),
        point("2024-05-02 15:58:00", 172.50, 0),
    ]);

    store
        .create_aggregates(vec![created.clone()])
        .await
        .expect("create");

    let found = store
        .find_aggregate(&aapl(), Interval::OneMinute)
        .await
        .expect("find")
        .expect("stored aggregate");
    assert_eq!(found, created);
    assert!(store
        .find_aggregate(&aapl(), Interval::OneDay)
        .await
        .expect("find")
        .is_none());
}

#[tokio::test]
async fn creating_an_existing_partition_is_refused() {
    let (_dir, store) = open_store();
    let first = aggregate(vec![point("2024-05-02 15:59:00", 172.95, 10)]);
    store
        .create_aggregates(vec![first.clone()])
        .await
        .expect("create");

    let error = store
        .create_aggregates(vec![first])
        .await
        .expect_err("duplicate");

    assert!(matches!(error, StoreError::DuplicateAggregate { .. }));
    assert!(error.escalates());
}

#[tokio::test]
async fn appending_to_a_missing_partition_reports_it_without_escalating() {
    let (_dir, store) = open_store();

    let error = store
        .append_points(
            &aapl(),
            Interval::OneMinute,
            vec![point("2024-05-02 15:59:00", 172.95, 10)],
        )
        .await
        .expect_err("missing partition");

    assert!(matches!(error, StoreError::AggregateMissing { .. }));
    assert!(!error.escalates());
}

#[tokio::test]
async fn appended_points_show_up_in_existing_timestamps() {
    let (_dir, store) = open_store();
    store
        .create_aggregates(vec![aggregate(vec![point("2024-05-02 15:58:00", 172.50, 10)])])
        .await
        .expect("create");

    store
        .append_points(
            &aapl(),
            Interval::OneMinute,
            vec![point("2024-05-02 15:59:00", 172.95, 20)],
        )
        .await
        .expect("append");

    let timestamps = store
        .existing_timestamps(&aapl(), Interval::OneMinute)
        .await
        .expect("timestamps");
    assert_eq!(timestamps.len(), 2);
    assert!(timestamps.contains(&Timestamp::parse("2024-05-02 15:59:00").expect("timestamp")));
    assert!(store
        .existing_timestamps(&aapl(), Interval::FiveMinutes)
        .await
        .expect("timestamps")
        .is_empty());
}

// =============================================================================
// End to End
// =============================================================================

#[tokio::test]
async fn bootstrap_then_incremental_lands_every_bar_once_in_duckdb() {
    // Given: A provider whose second answer overlaps the first
    let provider = ScriptedProvider::new();
    provider
        .respond("AAPL", series("AAPL", &[("2024-05-02 15:58:00", 172.50)]))
        .respond(
            "AAPL",
            series("AAPL", &[("2024-05-02 15:59:00", 172.95), ("2024-05-02 15:58:00", 172.50)]),
        );
    let (_dir, store) = open_store();
    let warehouse = store.warehouse().clone();
    let orchestrator = Orchestrator::new(
        gateway(&provider, roomy_bucket()),
        Arc::new(store) as Arc<dyn AggregateStore>,
        vec![item("AAPL")],
    );
    let (_trigger, shutdown) = shutdown::channel();

    // When: Bootstrap then two incremental runs execute
    orchestrator.bootstrap(&shutdown).await.expect("bootstrap");
    let appended = orchestrator.incremental(&shutdown).await.expect("incremental");
    let repeated = orchestrator.incremental(&shutdown).await.expect("repeat");

    // Then: Each bar is stored exactly once
    assert_eq!(appended.points_written, 1);
    assert_eq!(repeated.unchanged, 1);

    let listing = warehouse.list_stocks().expect("list");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].symbol, "AAPL");
    assert_eq!(listing[0].interval, "1min");
    assert_eq!(listing[0].point_count, 2);
    assert_eq!(listing[0].first_datetime.as_deref(), Some("2024-05-02 15:58:00"));
    assert_eq!(listing[0].last_datetime.as_deref(), Some("2024-05-02 15:59:00"));
}
