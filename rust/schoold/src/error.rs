use thiserror::Error;

/// Typed failures surfaced by the access, stats and report layers.
///
/// Every variant except `Store` is an expected outcome the caller maps to a
/// response code; `Store` means the backing database could not answer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::InvalidRequest(_) => "bad_params",
            CoreError::Conflict(_) => "conflict",
            CoreError::Store(_) => "db_query_failed",
        }
    }

    pub fn not_found(what: &str) -> Self {
        CoreError::NotFound(what.to_string())
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        CoreError::InvalidRequest(message.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
