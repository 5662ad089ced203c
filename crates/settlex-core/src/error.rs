use thiserror::Error;

use crate::config::ConfigError;

/// Validation errors for domain value constructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("trading date must be YYYY-MM-DD: '{value}'")]
    InvalidTradingDate { value: String },
    #[error("invalid call/put flag '{value}', expected Call or Put")]
    InvalidCallPut { value: String },

    #[error("timestamp must be RFC 3339: '{value}'")]
    InvalidTimestamp { value: String },
}

/// Top-level error type for opening and wiring the service.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("warehouse error: {0}")]
    Warehouse(#[from] settlex_warehouse::WarehouseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
