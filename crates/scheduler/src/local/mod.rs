//! In-process execution backend built on tokio.
//!
//! Split into focused submodules:
//! - `core`: `JobRunner` trait, `LocalBackend` struct and batch dispatch
//! - `execution`: per-activity retries and step timeouts

mod core;
mod execution;
#[cfg(test)]
mod tests;

pub use self::core::{JobRunner, LocalBackend};
