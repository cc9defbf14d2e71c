//! Model provider abstractions.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for dynamic dispatch
//! - `ModelInvoker`: timeout and bounded retries around a provider
//! - `ScriptedProvider`: replays canned replies for tests and offline runs

pub mod box_provider;
pub mod invoker;
pub mod provider;
pub mod scripted;
