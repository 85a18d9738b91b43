use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid path segment: {0:?}")]
    InvalidSegment(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Malformed document at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Persistence failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Catalog returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No deck or binder is open")]
    NoBinderSelected,

    #[error("Binder {0} does not exist")]
    BinderNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
