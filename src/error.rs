//! Error taxonomy for the catalog core.
//!
//! Absence is not an error for lookups: store reads return `Ok(None)` and
//! only the [`Catalog`](crate::catalog::Catalog) facade turns a miss on a
//! caller-supplied id into [`CatalogError::NotFound`].

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("external service error: {0}")]
    ExternalService(#[source] anyhow::Error),
    /// Persisted data could not be decoded. Never skipped silently.
    #[error("corrupt catalog data: {0}")]
    Corrupt(String),
    #[error("sqlite error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CatalogError {
    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "not_found",
            CatalogError::Validation(_) => "bad_request",
            CatalogError::ExternalService(_) => "upstream_error",
            CatalogError::Corrupt(_) => "corrupt_data",
            CatalogError::Storage(_) => "internal",
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
