// Error type shared by the parser, gateway, aggregator and HTTP surface

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinanceError {
    /// Client omitted required request fields. Carries exactly the absent names.
    #[error("Missing property: {}", .0.join(", "))]
    MissingProperty(Vec<String>),

    #[error("Invalid property '{field}': {reason}")]
    InvalidProperty { field: String, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness violation, e.g. an external reference imported twice.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Statement file could not be read at all. Per-transaction problems are
    /// reported as skipped groups instead.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FinanceError {
    pub fn missing<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FinanceError::MissingProperty(fields.into_iter().map(Into::into).collect())
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        FinanceError::InvalidProperty {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        FinanceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for errors caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FinanceError::MissingProperty(_)
                | FinanceError::InvalidProperty { .. }
                | FinanceError::NotFound { .. }
                | FinanceError::Conflict(_)
                | FinanceError::Parse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FinanceError>;
