use thiserror::Error;

/// Error type for the copy engine and its stores.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Strategy {0} is not active")]
    StrategyNotActive(i64),

    #[error("Offer {0} is not active")]
    OfferNotActive(i64),

    // State machine errors
    #[error("Invalid status transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Concurrent status update on subscription {0}")]
    Conflict(i64),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type alias for CopyError
pub type Result<T> = std::result::Result<T, CopyError>;

impl CopyError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the caller sent something wrong, as opposed to an infrastructure failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Validation(_)
                | Self::StrategyNotActive(_)
                | Self::OfferNotActive(_)
                | Self::InvalidTransition { .. }
                | Self::Conflict(_)
        )
    }
}
