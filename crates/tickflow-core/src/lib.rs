//! # Tickflow Core
//!
//! Rate-limited, scheduled ingestion of Twelve Data time series.
//!
//! ## Overview
//!
//! - **Rate gateway**: a token bucket admits provider calls; every remote
//!   outcome is classified into a stable [`ErrorKind`]
//! - **Merge engine**: keeps only points whose timestamp is not stored yet
//! - **Orchestrator**: bootstrap and incremental runs over the work items,
//!   fanned out concurrently and aborted on escalating failures
//! - **Scheduler**: one-shot and fixed-interval jobs with observable state
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | JSON configuration and environment overrides |
//! | [`domain`] | Symbols, intervals, timestamps, aggregates |
//! | [`error`] | Validation errors |
//! | [`gateway`] | Admission-controlled fetches and error kinds |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`merge`] | New-point detection |
//! | [`orchestrator`] | Bootstrap and incremental runs |
//! | [`provider`] | Twelve Data `time_series` client |
//! | [`scheduler`] | Job scheduling and state |
//! | [`shutdown`] | Cancellation signal |
//! | [`store`] | Storage contract, in-memory and DuckDB stores |
//! | [`throttling`] | Token bucket |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Scheduler     │  run_once(bootstrap), run_every(incremental)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Orchestrator   │────▶│  Merge engine    │
//! └────────┬────────┘     └──────────────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Rate gateway   │     │  AggregateStore  │
//! │  (token bucket) │     │  (DuckDB/memory) │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Twelve Data API │
//! └─────────────────┘
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod merge;
pub mod orchestrator;
pub mod provider;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod throttling;

pub use config::{ConfigError, IngestConfig, JobsConfig};
pub use domain::{
    Interval, Metadata, OutputSize, StockAggregate, Symbol, TimeSeriesPoint, Timestamp, WorkItem,
};
pub use error::ValidationError;
pub use gateway::{ErrorKind, FetchError, FetchResult, RateGateway};
pub use http_client::{
    ApiKeyAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use orchestrator::{ItemFailure, JobError, JobKind, Orchestrator, RunReport};
pub use provider::{ProviderConfig, TwelveDataClient};
pub use scheduler::{IngestJob, Job, JobHandle, JobState, Scheduler};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use store::{AggregateStore, MemoryStore, StoreError, WarehouseStore};
pub use throttling::{
    AcquireError, BucketStatistics, Lease, QueueOrder, TokenBucket, TokenBucketConfig,
};
