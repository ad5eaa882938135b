use thiserror::Error;

use tickflow_core::throttling::BucketConfigError;
use tickflow_core::{ConfigError, Interval, JobError, Symbol, ValidationError};
use tickflow_warehouse::WarehouseError;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rate limit: {0}")]
    RateLimit(#[from] BucketConfigError),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("{0}")]
    Job(#[from] JobError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("no stored partition for {symbol} ({interval})")]
    PartitionNotFound { symbol: Symbol, interval: Interval },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::RateLimit(_) | Self::Logging(_) => 2,
            Self::Job(JobError::Cancelled) => 130,
            Self::Job(_) => 3,
            Self::Warehouse(_) => 4,
            Self::Serialization(_) => 5,
            Self::PartitionNotFound { .. } => 6,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_categories_to_exit_codes() {
        assert_eq!(CliError::from(ConfigError::MissingApiKey).exit_code(), 2);
        assert_eq!(CliError::from(JobError::Cancelled).exit_code(), 130);
        assert_eq!(
            CliError::from(JobError::Task(String::from("panicked"))).exit_code(),
            3
        );
        assert_eq!(
            CliError::PartitionNotFound {
                symbol: Symbol::parse("AAPL").expect("symbol"),
                interval: Interval::OneMinute,
            }
            .exit_code(),
            6
        );
    }
}
