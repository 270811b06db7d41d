//! Core business logic shared by the CLI and the HTTP API.

pub mod agent;
mod error;
pub mod history;
pub mod keychain;
pub mod repo;
pub mod run;
pub mod storage;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use agent::Agent;
pub use error::{Error, Result};
pub use run::{RunReport, Task, TaskRunner};
