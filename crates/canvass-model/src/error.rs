use thiserror::Error;

/// Errors surfaced by the edit and imputation engine.
#[derive(Error, Debug)]
pub enum CanvassError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed declaration; fatal at grid or plan build.
    #[error("invalid declaration: {0}")]
    Config(String),

    /// A record value that is not in the field's admissible set. Never
    /// coerced; the declaration is the source of truth.
    #[error("unknown value {value:?} for field {field}")]
    UnknownValue { field: String, value: String },

    #[error("unknown field: {0}")]
    UnknownField(String),

    /// Failure accounting disagreed with the checker result. Indicates a
    /// defect, never recovered.
    #[error("internal inconsistency: {detail} (record: {record})")]
    InternalInconsistency { detail: String, record: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Message(String),
}

/// Errors from the relational store contract.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("query failed: {detail} (sql: {sql})")]
    Query { sql: String, detail: String },

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("no open transaction")]
    NoTransaction,

    #[error("{0}")]
    Message(String),
}

impl StoreError {
    pub fn query(sql: impl Into<String>, detail: impl ToString) -> Self {
        StoreError::Query {
            sql: sql.into(),
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CanvassError>;
