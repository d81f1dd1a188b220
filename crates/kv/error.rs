use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Lock Error: Panicked when trying to acquire a lock")]
    Lock,
    #[error("Database backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("{0}")]
    Custom(String),
}
