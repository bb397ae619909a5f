use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashError {
    #[error("row {row} is missing primary key column '{column}'")]
    MissingKeyColumn { column: String, row: usize },

    #[error("no primary key columns declared")]
    NoKeyColumns,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("conditional merge conflict: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CleansingError {
    #[error("unknown cleansing function '{0}'")]
    UnknownFunction(String),

    #[error("cleansing function '{function}' failed: {message}")]
    FunctionFailed { function: String, message: String },

    #[error("invalid cleansing rules: {0}")]
    InvalidRules(String),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("duplicate primary key in change-set: {0}")]
    DuplicateKey(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cleansing(#[from] CleansingError),
}
