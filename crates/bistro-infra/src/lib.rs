//! Infrastructure layer for Bistro.
//!
//! Concrete collaborators for the traits defined in `bistro-core`: the
//! Anthropic model provider, SQLite checkpoint storage, the reservation
//! backend tools and the TOML config loader.

pub mod config;
pub mod llm;
pub mod sqlite;
pub mod store;
pub mod tools;
