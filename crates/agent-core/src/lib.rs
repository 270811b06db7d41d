//! Model-facing layer for repo-pilot.
//!
//! Holds the message types sent to language models, the streaming
//! [`provider::LlmProvider`] abstraction with its concrete backends, and the
//! append-only [`conversation::Conversation`] log the agent loop resends on
//! every call.

pub mod conversation;
pub mod error;
pub mod provider;
pub mod providers;
pub mod sse;
pub mod types;
