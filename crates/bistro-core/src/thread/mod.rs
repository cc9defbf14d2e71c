//! Thread-level state: the append-only log and per-thread locking.

pub mod lock;
pub mod log;

pub use self::lock::{ThreadGuard, ThreadLocks};
pub use self::log::{AppendError, MessageLog};
