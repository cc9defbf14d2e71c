//! Anthropic Claude LLM provider implementation.
//!
//! This module provides the [`AnthropicProvider`] which implements the
//! [`LlmProvider`](bistro_core::llm::provider::LlmProvider) trait for
//! the Anthropic Messages API, including SSE streaming, tool use and
//! prompt-cache markers.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::AnthropicProvider;
