//! Rate gateway: token-bucket admission in front of the provider client.
//!
//! Every remote outcome is folded into a [`FetchResult`]; callers branch on
//! [`ErrorKind`] rather than on transport details.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use tracing::debug;

use crate::provider::TwelveDataClient;
use crate::throttling::{AcquireError, BucketStatistics, TokenBucket};
use crate::{StockAggregate, TimeSeriesPoint, WorkItem};

/// Stable classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected locally by the token bucket.
    Throttled,
    /// HTTP 429 from the provider.
    RateLimited,
    Unauthorized,
    NotFound,
    BadRequest,
    /// Any other non-success status.
    Unknown,
    /// Timeout, connect failure or unreadable body.
    Transport,
    /// Response could not be decoded.
    Fatal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Unknown => "unknown",
            Self::Transport => "transport",
            Self::Fatal => "fatal",
        }
    }

    /// Kinds that abort the whole run instead of skipping one item.
    pub const fn escalates(self) -> bool {
        matches!(self, Self::Transport | Self::Fatal)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchError {
    kind: ErrorKind,
    message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for FetchError {}

impl From<AcquireError> for FetchError {
    fn from(value: AcquireError) -> Self {
        match value {
            AcquireError::Throttled => Self::new(ErrorKind::Throttled, value.to_string()),
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Admission-controlled access to the provider.
#[derive(Debug)]
pub struct RateGateway {
    bucket: TokenBucket,
    client: TwelveDataClient,
}

impl RateGateway {
    pub fn new(bucket: TokenBucket, client: TwelveDataClient) -> Self {
        Self { bucket, client }
    }

    /// Fetch metadata and points, for creating a new partition.
    pub async fn fetch_aggregate(&self, item: &WorkItem) -> FetchResult<StockAggregate> {
        self.admit(item).await?;
        self.client.time_series(item).await
    }

    /// Fetch points only, for appending to an existing partition.
    pub async fn fetch_points(&self, item: &WorkItem) -> FetchResult<Vec<TimeSeriesPoint>> {
        let aggregate = self.fetch_aggregate(item).await?;
        let (_, points) = aggregate.into_parts();
        Ok(points)
    }

    pub fn statistics(&self) -> BucketStatistics {
        self.bucket.statistics()
    }

    async fn admit(&self, item: &WorkItem) -> FetchResult<()> {
        let lease = self.bucket.acquire().await;
        let stats = self.bucket.statistics();
        debug!(
            symbol = %item.symbol,
            interval = %item.interval,
            admitted = lease.is_ok(),
            available_tokens = stats.available_tokens,
            queued = stats.queued,
            total_successful_leases = stats.total_successful_leases,
            total_failed_leases = stats.total_failed_leases,
            "rate gateway admission"
        );
        lease?;
        Ok(())
    }
}
