//! The orchestration state machine and the prompt pipeline feeding it.
//!
//! - `token_counter` / `budget`: count tokens and trim the log to a window
//! - `summarizer`: stable digest of evicted history
//! - `prompt`: system prefix, window messages and cache breakpoints
//! - `narration`: status lines for upcoming tool calls
//! - `state`: pure transition function
//! - `orchestrator`: runs nodes, emits events and checkpoints transitions

pub mod budget;
pub mod narration;
pub mod orchestrator;
pub mod prompt;
pub mod state;
pub mod summarizer;
pub mod token_counter;
