//! Entity loads wired into the batch scheduler.

pub mod entity;
pub mod error;
pub mod source;

pub use entity::{is_incremental, EntityJobRunner, EntityLayer, EntityParams, EntitySource};
pub use error::JobError;
pub use source::read_rows;
