use thiserror::Error;

use crate::domain::LedgerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Subject already exists: {0}")]
    SubjectAlreadyExists(String),

    #[error("Material not found: {0}")]
    MaterialNotFound(String),

    #[error("Material already exists: {0}")]
    MaterialAlreadyExists(String),

    #[error("Code must not be empty")]
    EmptyCode,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Import rejected at line {line}: {source}")]
    ImportRejected { line: usize, source: LedgerError },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    /// The ledger rejection behind this error, if any.
    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            AppError::Ledger(err) | AppError::ImportRejected { source: err, .. } => Some(err),
            _ => None,
        }
    }
}
