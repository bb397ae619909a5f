pub mod config;
pub mod error;
pub mod job;
pub mod row;

pub use config::Config;
pub use error::*;
pub use job::*;
pub use row::*;
