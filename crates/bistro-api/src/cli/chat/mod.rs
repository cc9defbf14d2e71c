//! Interactive terminal chat with the reservation host.
//!
//! A line REPL over one thread: guest lines are submitted to the engine,
//! fragments stream to stdout as they arrive, and tool progress is shown
//! inline. Ctrl+C cancels the turn in flight.

pub mod banner;
pub mod commands;
pub mod loop_runner;
pub mod renderer;

pub use loop_runner::run_chat_loop;
