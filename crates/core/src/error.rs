use thiserror::Error;

#[derive(Error, Debug)]
pub enum FmdError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid job definition: {0}")]
    InvalidJob(String),
}
