use std::path::PathBuf;

use fmd_merge::{CleansingError, MergeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("missing job parameter: {0}")]
    MissingParam(&'static str),

    #[error("unknown entity layer '{0}'")]
    UnknownLayer(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Cleansing(#[from] CleansingError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
