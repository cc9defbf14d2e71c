//! Shared domain types for the Bistro conversation engine.
//!
//! Turns, conversations, checkpoints, LLM wire shapes, tool schemas,
//! caller events, configuration and the failure taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod llm;
pub mod tool;
pub mod turn;
