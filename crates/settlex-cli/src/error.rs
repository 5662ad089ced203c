use settlex_core::{ConfigError, CoreError, IngestError, QueryError, StoreError, ValidationError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<QueryError> for CliError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::InvalidQuery(message) => Self::Usage(message),
            QueryError::Store(error) => Self::Store(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Usage(_) => 2,
            Self::Ingest(IngestError::Fetch(_)) => 7,
            Self::Ingest(_) => 3,
            Self::Store(_) => 6,
            Self::Core(CoreError::Warehouse(_)) => 6,
            Self::Core(CoreError::Serialization(_)) => 4,
            Self::Core(_) => 2,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlex_core::{FetchError, StoreErrorKind, TradingDate};

    #[test]
    fn exit_codes_follow_error_category() {
        let date = TradingDate::parse("2023-08-22").expect("date");
        assert_eq!(
            CliError::from(IngestError::Fetch(FetchError::NotFound { trading_date: date }))
                .exit_code(),
            7
        );
        assert_eq!(
            CliError::from(IngestError::ConcurrentIngestionInProgress { trading_date: date })
                .exit_code(),
            3
        );
        assert_eq!(
            CliError::from(QueryError::Store(StoreError::new(
                StoreErrorKind::Unavailable,
                "document",
                "down"
            )))
            .exit_code(),
            6
        );
        assert_eq!(
            CliError::from(QueryError::InvalidQuery("start after end".into())).exit_code(),
            2
        );
        assert_eq!(CliError::from(ValidationError::EmptySymbol).exit_code(), 2);
    }
}
