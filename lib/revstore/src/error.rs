use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Archived: {0}")]
    Archived(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid lineage: {0}")]
    InvalidLineage(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, StoreError::Archived(_))
    }

    /// Failures of the backing database or of (de)serialization.
    pub fn is_internal(&self) -> bool {
        matches!(self, StoreError::Internal(_) | StoreError::Serialization(_))
    }
}
