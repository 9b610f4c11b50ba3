//! Error taxonomy for tracking, ingestion and scheduling
//!
//! Unparsable prices are not errors: the price parser yields `None` and the
//! record is kept without a history point.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Record has no base product identity")]
    MissingIdentity,

    #[error("Provider fetch failed for {target}: {reason}")]
    ProviderFetch { target: String, reason: String },

    #[error("Store operation failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Store operation failed: {0}")]
    StoreState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline of {seconds}s exceeded during {operation}")]
    DeadlineExceeded { operation: String, seconds: u64 },

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn provider_fetch(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderFetch {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Per-record and per-page failures are recoverable; the batch goes on.
    /// Store failures abort and roll back the whole batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingIdentity | Self::ProviderFetch { .. } | Self::DeadlineExceeded { .. }
        )
    }

    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StoreState(_))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recoverable_errors() {
        assert!(TrackerError::MissingIdentity.is_recoverable());
        assert!(TrackerError::provider_fetch("page 2", "timeout").is_recoverable());
        assert!(!TrackerError::StoreState("disk full".into()).is_recoverable());
        assert!(TrackerError::StoreState("disk full".into()).is_store_failure());
        assert!(!TrackerError::Cancelled.is_store_failure());
    }
}
