use thiserror::Error;

/// Error taxonomy for review operations
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Review session already exists for {source_ref}")]
    AlreadyExists { source_ref: String },

    #[error("Cannot complete review: {missing} prediction(s) still lack actual data")]
    IncompleteData { missing: usize },

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("Review session {id} is already completed")]
    SessionCompleted { id: String },

    #[error("Concurrent update detected on review session {id}")]
    Conflict { id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for review operations
pub type ReviewResult<T> = Result<T, ReviewError>;

impl ReviewError {
    /// Errors the caller can fix by changing the request (4xx-equivalent)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ReviewError::Validation { .. }
                | ReviewError::NotFound { .. }
                | ReviewError::AlreadyExists { .. }
                | ReviewError::IncompleteData { .. }
                | ReviewError::SessionCompleted { .. }
        )
    }

    /// Create a validation error with field context
    pub fn validation_error<S: Into<String>>(field: S, message: S) -> Self {
        ReviewError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found<E: Into<String>, I: ToString>(entity: E, id: I) -> Self {
        ReviewError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_classification() {
        assert!(ReviewError::validation_error("actual_low", "must be positive").is_user_error());
        assert!(ReviewError::IncompleteData { missing: 2 }.is_user_error());
        assert!(ReviewError::not_found("conversation", "abc").is_user_error());
        assert!(!ReviewError::Collaborator("timeout".to_string()).is_user_error());
        assert!(!ReviewError::Conflict { id: "x".to_string() }.is_user_error());
    }

    #[test]
    fn test_incomplete_data_message_carries_count() {
        let err = ReviewError::IncompleteData { missing: 3 };
        assert!(err.to_string().contains("3 prediction(s)"));
    }
}
