use thiserror::Error;

/// Core error types for OctoFHIR realtime data
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid resource type: {0}")]
    InvalidResourceType(String),

    #[error("Invalid resource ID: {0}")]
    InvalidId(String),

    #[error("Invalid update event: {message}")]
    InvalidEvent { message: String },

    #[error("Invalid resource data: {message}")]
    InvalidResource { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidResourceType error
    pub fn invalid_resource_type(resource_type: impl Into<String>) -> Self {
        Self::InvalidResourceType(resource_type.into())
    }

    /// Create a new InvalidId error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    /// Create a new InvalidEvent error
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    /// Create a new InvalidResource error
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidResourceType(_) | Self::InvalidId(_) => ErrorCategory::Validation,
            Self::InvalidEvent { .. } | Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::JsonError(_) => ErrorCategory::Serialization,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Serialization,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CoreError::invalid_resource_type("");
        assert_eq!(err.to_string(), "Invalid resource type: ");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_invalid_event_error() {
        let err = CoreError::invalid_event("created event without resource");
        assert_eq!(
            err.to_string(),
            "Invalid update event: created event without resource"
        );
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let core_err: CoreError = json_err.into();

        assert!(matches!(core_err, CoreError::JsonError(_)));
        assert_eq!(core_err.category(), ErrorCategory::Serialization);
    }

    #[test]
    fn test_error_categories_display() {
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
        assert_eq!(ErrorCategory::Serialization.to_string(), "serialization");
    }

    #[test]
    fn test_error_message_formats() {
        let invalid_id = CoreError::invalid_id("bad id!");
        assert!(invalid_id.to_string().contains("bad id!"));

        let invalid_resource = CoreError::invalid_resource("snapshot must be an object");
        assert!(
            invalid_resource
                .to_string()
                .contains("snapshot must be an object")
        );
    }
}
