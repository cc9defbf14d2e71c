//! Orchestration engine for Bistro conversation threads.
//!
//! This crate holds the state machine and everything it drives: token
//! budgeting, summaries, the tool registry and executor, model invocation,
//! checkpointing and event streaming. Concrete collaborators (the model
//! provider, the reservation backend, SQLite) live in `bistro-infra` and
//! plug in through the traits defined here.

pub mod agent;
pub mod checkpoint;
pub mod engine;
pub mod llm;
pub mod stream;
pub mod thread;
pub mod tool;

pub use engine::{ConversationEngine, EngineError, TurnReport};
