//! Ordered delivery of turn events to the caller.
//!
//! Every turn gets its own unbounded channel: the state machine pushes
//! events through an [`EventSink`] from a single task, so the receiver in
//! [`TurnHandle`] sees them in exactly the order they were produced.
//! Once the turn's cancellation token fires, incremental events are
//! dropped at the sink and only the final status still goes through.

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use bistro_types::event::TurnEvent;

use crate::engine::{EngineError, TurnReport};

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

/// Producer half of a turn's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    /// A sink whose events go nowhere, for turns run without a listener.
    pub fn detached() -> Self {
        let (sink, _rx) = Self::new(CancellationToken::new());
        sink
    }

    /// Forward an incremental event. Dropped once the turn is cancelled.
    pub fn emit(&self, event: TurnEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A caller that stopped listening does not stop the turn.
        let _ = self.tx.send(event);
    }

    /// Forward a final status event, even after cancellation.
    pub fn finish(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

/// Caller's handle on an in-flight turn.
pub struct TurnHandle {
    turn_id: String,
    thread_id: String,
    events: mpsc::UnboundedReceiver<TurnEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<TurnReport, EngineError>>,
}

impl TurnHandle {
    pub(crate) fn new(
        turn_id: String,
        thread_id: String,
        events: mpsc::UnboundedReceiver<TurnEvent>,
        cancel: CancellationToken,
        task: JoinHandle<Result<TurnReport, EngineError>>,
    ) -> Self {
        Self {
            turn_id,
            thread_id,
            events,
            cancel,
            task,
        }
    }

    /// Identifies this turn for [`ConversationEngine::cancel_turn`].
    ///
    /// [`ConversationEngine::cancel_turn`]: crate::engine::ConversationEngine::cancel_turn
    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Ask the turn to stop. Fragments stop immediately; committed turns stay.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the turn has finished emitting.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Split into an event stream and the task's join handle.
    pub fn into_stream(
        self,
    ) -> (
        impl Stream<Item = TurnEvent> + Send + 'static,
        JoinHandle<Result<TurnReport, EngineError>>,
    ) {
        (UnboundedReceiverStream::new(self.events), self.task)
    }

    /// Drain the remaining events and wait for the turn's report.
    pub async fn collect(mut self) -> (Vec<TurnEvent>, Result<TurnReport, EngineError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let report = match self.task.await {
            Ok(report) => report,
            Err(err) => Err(EngineError::Aborted(err.to_string())),
        };
        (events, report)
    }
}

impl std::fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("turn_id", &self.turn_id)
            .field("thread_id", &self.thread_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
