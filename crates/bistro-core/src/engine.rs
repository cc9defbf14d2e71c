//! `ConversationEngine`: the process-wide context object.
//!
//! Constructed once at startup from its collaborators and shared by
//! cloning. Every turn runs on its own task, serialized per thread id by
//! [`ThreadLocks`]; distinct threads run fully in parallel and share
//! nothing mutable besides the keyed checkpoint store.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use bistro_types::conversation::{Conversation, Node};
use bistro_types::error::FailureKind;
use bistro_types::llm::Usage;
use bistro_types::turn::Turn;

use crate::agent::orchestrator::{Orchestrator, RunState};
use crate::agent::summarizer::Summarizer;
use crate::checkpoint::{CheckpointError, CheckpointStore, ThreadInfo};
use crate::stream::{EventSink, TurnHandle};
use crate::thread::{AppendError, MessageLog, ThreadLocks};

// ---------------------------------------------------------------------------
// Report and errors
// ---------------------------------------------------------------------------

/// What one turn did to its thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub thread_id: String,
    /// Node the thread rests at: END, or where a cancelled turn stopped.
    pub node: Node,
    pub round_trips: u32,
    /// Turns appended by the state machine, oldest first.
    pub appended_turns: Vec<Turn>,
    pub failure: Option<FailureKind>,
    pub cancelled: bool,
    pub usage: Usage,
}

impl TurnReport {
    /// Text of the last assistant message, if the turn produced one.
    pub fn reply_text(&self) -> Option<String> {
        self.appended_turns
            .iter()
            .rev()
            .find(|t| t.is_message() && t.role == bistro_types::turn::Role::Assistant)
            .map(|t| t.text())
            .filter(|text| !text.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("message log rejected a turn: {0}")]
    Append(#[from] AppendError),

    #[error("thread '{0}' not found")]
    NotFound(String),

    #[error("thread '{0}' has no unfinished turn to resume")]
    NothingToResume(String),

    #[error("turn task aborted: {0}")]
    Aborted(String),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A submitted turn that has not finished, queued or running.
struct PendingTurn {
    thread_id: String,
    cancel: CancellationToken,
    /// Holds its thread lock.
    running: bool,
}

struct EngineInner<C: CheckpointStore, S: Summarizer> {
    orchestrator: Orchestrator<C, S>,
    locks: ThreadLocks,
    /// Unfinished turns by turn id, registered at submit time.
    pending: DashMap<String, PendingTurn>,
}

pub struct ConversationEngine<C: CheckpointStore, S: Summarizer> {
    inner: Arc<EngineInner<C, S>>,
}

impl<C: CheckpointStore, S: Summarizer> Clone for ConversationEngine<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Entry {
    Message(String),
    Resume,
}

impl<C, S> ConversationEngine<C, S>
where
    C: CheckpointStore + 'static,
    S: Summarizer + 'static,
{
    pub fn new(orchestrator: Orchestrator<C, S>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                orchestrator,
                locks: ThreadLocks::new(),
                pending: DashMap::new(),
            }),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<C, S> {
        &self.inner.orchestrator
    }

    /// Submit an external message for `thread_id`.
    ///
    /// The message is appended and the machine re-enters at AGENT with a
    /// fresh round-trip count, even if an earlier turn was left unfinished.
    /// A turn already running on the same thread finishes first.
    pub fn submit(&self, thread_id: impl Into<String>, text: impl Into<String>) -> TurnHandle {
        self.spawn_turn(thread_id.into(), Entry::Message(text.into()))
    }

    /// Continue an unfinished turn from its checkpoint without a new message.
    pub fn resume(&self, thread_id: impl Into<String>) -> TurnHandle {
        self.spawn_turn(thread_id.into(), Entry::Resume)
    }

    /// Cancel the turn currently running on `thread_id`. Queued turns are
    /// left alone. Returns `false` if none is running.
    pub fn cancel(&self, thread_id: &str) -> bool {
        let running = self
            .inner
            .pending
            .iter()
            .find(|turn| turn.running && turn.thread_id == thread_id)
            .map(|turn| turn.cancel.clone());
        match running {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel one turn of `thread_id` by its id, whether it is running or
    /// still queued. A queued turn then never touches the thread.
    pub fn cancel_turn(&self, thread_id: &str, turn_id: &str) -> bool {
        match self.inner.pending.get(turn_id) {
            Some(turn) if turn.thread_id == thread_id => {
                turn.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.inner.locks.is_busy(thread_id)
    }

    pub async fn conversation(&self, thread_id: &str) -> Result<Option<Conversation>, EngineError> {
        let checkpoint = self.inner.orchestrator.checkpointer().restore(thread_id).await?;
        Ok(checkpoint.map(|c| c.conversation))
    }

    /// Delete a thread's checkpoint once any running turn on it has finished.
    pub async fn retire(&self, thread_id: &str) -> Result<bool, EngineError> {
        let guard = self.inner.locks.acquire(thread_id).await;
        let existed = self.inner.orchestrator.checkpointer().retire(thread_id).await;
        drop(guard);
        self.inner.locks.release(thread_id);
        Ok(existed?)
    }

    pub async fn threads(&self) -> Result<Vec<ThreadInfo>, EngineError> {
        Ok(self.inner.orchestrator.checkpointer().threads().await?)
    }

    fn spawn_turn(&self, thread_id: String, entry: Entry) -> TurnHandle {
        let turn_id = Uuid::now_v7().to_string();
        let cancel = CancellationToken::new();
        let (sink, events) = EventSink::new(cancel.clone());
        let inner = Arc::clone(&self.inner);
        let span = info_span!("turn", thread_id = %thread_id, turn_id = %turn_id);

        // registered before spawning so the turn is cancellable while queued
        inner.pending.insert(
            turn_id.clone(),
            PendingTurn {
                thread_id: thread_id.clone(),
                cancel: cancel.clone(),
                running: false,
            },
        );

        let task = {
            let thread_id = thread_id.clone();
            let turn_id = turn_id.clone();
            tokio::spawn(
                async move {
                    let result = Self::run_turn(&inner, &turn_id, &thread_id, entry, &sink).await;
                    inner.pending.remove(&turn_id);
                    inner.locks.release(&thread_id);
                    result
                }
                .instrument(span),
            )
        };

        TurnHandle::new(turn_id, thread_id, events, cancel, task)
    }

    async fn run_turn(
        inner: &EngineInner<C, S>,
        turn_id: &str,
        thread_id: &str,
        entry: Entry,
        sink: &EventSink,
    ) -> Result<TurnReport, EngineError> {
        let guard = tokio::select! {
            biased;
            _ = sink.cancel_token().cancelled() => {
                info!("Turn cancelled before it started");
                return Self::cancelled_while_queued(inner, thread_id).await;
            }
            guard = inner.locks.acquire(thread_id) => guard,
        };
        if let Some(mut turn) = inner.pending.get_mut(turn_id) {
            turn.running = true;
        }
        let result = Self::run_entry(inner, thread_id, entry, sink).await;
        drop(guard);
        result
    }

    /// Report for a turn that was cancelled before it held its thread.
    async fn cancelled_while_queued(
        inner: &EngineInner<C, S>,
        thread_id: &str,
    ) -> Result<TurnReport, EngineError> {
        let stored = inner.orchestrator.checkpointer().restore(thread_id).await?;
        let (node, round_trips) = stored.map_or((Node::End, 0), |c| (c.node, c.round_trips));
        Ok(TurnReport {
            thread_id: thread_id.to_string(),
            node,
            round_trips,
            appended_turns: Vec::new(),
            failure: None,
            cancelled: true,
            usage: Usage::default(),
        })
    }

    async fn run_entry(
        inner: &EngineInner<C, S>,
        thread_id: &str,
        entry: Entry,
        sink: &EventSink,
    ) -> Result<TurnReport, EngineError> {
        let checkpointer = inner.orchestrator.checkpointer();
        let stored = checkpointer.restore(thread_id).await?;

        let state = match entry {
            Entry::Message(text) => {
                let conversation = match stored {
                    Some(checkpoint) => {
                        if checkpoint.is_unfinished() {
                            info!(node = %checkpoint.node, "New message supersedes an unfinished turn");
                        }
                        checkpoint.conversation
                    }
                    None => {
                        info!("Starting new thread");
                        Conversation::new(thread_id)
                    }
                };
                let mut log = MessageLog::new(conversation);
                log.append(Turn::user(text))?;
                checkpointer.save(log.conversation(), Node::Agent, 0).await?;
                RunState {
                    log,
                    node: Node::Agent,
                    round_trips: 0,
                }
            }
            Entry::Resume => match stored {
                Some(checkpoint) if checkpoint.is_unfinished() => {
                    info!(node = %checkpoint.node, round_trips = checkpoint.round_trips, "Resuming thread");
                    RunState::from_checkpoint(checkpoint)
                }
                Some(_) => return Err(EngineError::NothingToResume(thread_id.to_string())),
                None => return Err(EngineError::NotFound(thread_id.to_string())),
            },
        };

        inner.orchestrator.run(state, sink).await
    }
}
