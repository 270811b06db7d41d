//! repo-pilot - an autonomous coding agent for GitHub repositories.
//!
//! A language model explores a repository through a small tool catalog,
//! stages whole-file writes, and lands them as a pull request or a direct
//! push. The same core drives both front ends:
//!
//! ```text
//! ┌─────────────┐        ┌─────────────┐
//! │     CLI     │        │   HTTP API  │
//! └──────┬──────┘        └──────┬──────┘
//!        └──────────┬───────────┘
//!            ┌──────┴──────┐
//!            │    Core     │──── agent-core (model providers)
//!            └──────┬──────┘
//!            ┌──────┴──────┐
//!            │  GitHub API │
//!            └─────────────┘
//! ```

pub mod api;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod core;

pub use config::Config;
pub use core::agent::{Agent, AgentStep, LandingMode, LandingResult, StepEmitter};
pub use core::run::{Task, TaskRunner};
