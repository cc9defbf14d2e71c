//! The AGENT / NARRATE / TOOLS / END state machine.
//!
//! `Orchestrator::run` drives one thread from its current node until END
//! or cancellation. Each node mutates the thread's [`MessageLog`], the
//! pure [`transition`] function picks the next node, and the checkpoint
//! is written before the machine moves on. A crash therefore resumes at
//! the last completed node.
//!
//! Tool results of one TOOLS node are appended in a single batch together
//! with the transition back to AGENT. Cancellation is checked before every
//! node and while model fragments stream in; a TOOLS node that has started
//! runs to completion so its side effects are always recorded.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bistro_observe::genai_attrs::OP_INVOKE_AGENT;
use bistro_types::config::EngineConfig;
use bistro_types::conversation::{Checkpoint, Node};
use bistro_types::error::FailureKind;
use bistro_types::event::TurnEvent;
use bistro_types::llm::Usage;
use bistro_types::turn::{ToolCall, Turn};

use crate::checkpoint::{CheckpointStore, Checkpointer};
use crate::engine::{EngineError, TurnReport};
use crate::llm::invoker::{ModelChunk, ModelInvoker};
use crate::stream::EventSink;
use crate::thread::MessageLog;
use crate::tool::executor::ToolExecutor;

use super::budget::trim_to_budget;
use super::narration::narrate;
use super::prompt::{build_prompt, prompt_view};
use super::state::{LoopPolicy, Observation, Step, count_round_trip, transition};
use super::summarizer::{Summarizer, refresh_summary};
use super::token_counter::TokenCounter;

// ---------------------------------------------------------------------------
// Settings and run state
// ---------------------------------------------------------------------------

/// Orchestration settings shared by every thread.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub instructions: String,
    pub token_budget: usize,
    pub summary_chunk_chars: usize,
    pub policy: LoopPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig, instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            token_budget: config.token_budget,
            summary_chunk_chars: config.summary_chunk_chars,
            policy: LoopPolicy::from_config(config),
        }
    }
}

/// Where a thread stands: its log, the next node to run and the round trips so far.
#[derive(Debug, Clone)]
pub struct RunState {
    pub log: MessageLog,
    pub node: Node,
    pub round_trips: u32,
}

impl RunState {
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            log: MessageLog::new(checkpoint.conversation),
            node: checkpoint.node,
            round_trips: checkpoint.round_trips,
        }
    }
}

/// How an AGENT node ended.
enum AgentOutcome {
    Reply { text: String, usage: Usage },
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<C: CheckpointStore, S: Summarizer> {
    invoker: Arc<ModelInvoker>,
    executor: ToolExecutor,
    summarizer: S,
    checkpointer: Checkpointer<C>,
    counter: Arc<dyn TokenCounter>,
    settings: EngineSettings,
}

impl<C: CheckpointStore, S: Summarizer> Orchestrator<C, S> {
    pub fn new(
        invoker: Arc<ModelInvoker>,
        executor: ToolExecutor,
        summarizer: S,
        checkpointer: Checkpointer<C>,
        counter: Arc<dyn TokenCounter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            invoker,
            executor,
            summarizer,
            checkpointer,
            counter,
            settings,
        }
    }

    pub fn checkpointer(&self) -> &Checkpointer<C> {
        &self.checkpointer
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run `state` until END or cancellation.
    ///
    /// Only storage failures and log invariant breaches are errors; model
    /// and loop-bound failures end the turn with a failure turn and are
    /// reported in the returned [`TurnReport`].
    #[tracing::instrument(
        name = "orchestrate",
        skip_all,
        fields(
            gen_ai.operation.name = OP_INVOKE_AGENT,
            thread_id = %state.log.conversation().thread_id,
            node = %state.node,
        )
    )]
    pub async fn run(&self, mut state: RunState, sink: &EventSink) -> Result<TurnReport, EngineError> {
        let thread_id = state.log.conversation().thread_id.clone();
        let first_new = state.log.len();
        let mut usage = Usage::default();
        let mut final_text = String::new();
        let mut failure = None;
        let mut cancelled = false;

        while state.node != Node::End {
            if sink.is_cancelled() {
                cancelled = true;
                break;
            }

            let node = state.node;
            debug!(%node, round_trips = state.round_trips, "Entering node");
            let step = match node {
                Node::Agent => match self.agent(&mut state.log, sink).await? {
                    AgentOutcome::Reply { text, usage: used } => {
                        add_usage(&mut usage, &used);
                        final_text = text;
                        Ok(transition(node, Observation::of(&state.log), state.round_trips, self.settings.policy))
                    }
                    AgentOutcome::Failed { kind, message } => Err((kind, message)),
                    AgentOutcome::Cancelled => {
                        cancelled = true;
                        break;
                    }
                },
                Node::Narrate => {
                    self.narrate(&mut state.log)?;
                    Ok(transition(node, Observation::of(&state.log), state.round_trips, self.settings.policy))
                }
                Node::Tools => {
                    self.tools(&mut state.log, sink).await?;
                    Ok(transition(node, Observation::of(&state.log), state.round_trips, self.settings.policy))
                }
                Node::End => break,
            };

            let halt = match step {
                Ok(Step::Go(next)) => {
                    state.round_trips = count_round_trip(next, state.round_trips);
                    state.node = next;
                    None
                }
                Ok(Step::Halt(kind)) => Some((
                    kind,
                    format!(
                        "Stopped after {} tool round trips without a final answer.",
                        self.settings.policy.max_round_trips
                    ),
                )),
                Err(failed) => Some(failed),
            };

            if let Some((kind, message)) = halt {
                warn!(%kind, %message, "Turn failed");
                state.log.append(Turn::failure(kind, &message))?;
                state.node = Node::End;
                failure = Some(kind);
                final_text.clear();
                sink.finish(TurnEvent::Error { kind, message });
            }

            self.checkpointer
                .save(state.log.conversation(), state.node, state.round_trips)
                .await?;
        }

        if cancelled {
            info!(node = %state.node, "Turn cancelled");
        } else {
            sink.finish(TurnEvent::TurnComplete {
                thread_id: thread_id.clone(),
                node: state.node,
                round_trips: state.round_trips,
                text: final_text,
                usage: Some(usage.clone()),
            });
        }

        Ok(TurnReport {
            thread_id,
            node: state.node,
            round_trips: state.round_trips,
            appended_turns: state.log.turns()[first_new..].to_vec(),
            failure,
            cancelled,
            usage,
        })
    }

    /// AGENT: trim, summarize, invoke the model and append its reply.
    async fn agent(&self, log: &mut MessageLog, sink: &EventSink) -> Result<AgentOutcome, EngineError> {
        let view = prompt_view(&self.settings.instructions, log.turns());
        let window = match trim_to_budget(&view, self.settings.token_budget, self.counter.as_ref()) {
            Ok(window) => window,
            Err(err) => {
                return Ok(AgentOutcome::Failed {
                    kind: FailureKind::BudgetUnsatisfiable,
                    message: err.to_string(),
                });
            }
        };
        if window.is_trimmed() {
            debug!(
                evicted = window.evicted.len(),
                retained = window.retained.len(),
                tokens = window.tokens,
                "Trimmed prompt window"
            );
        }

        let current = log.conversation().summary.clone();
        let summary = match refresh_summary(
            &self.summarizer,
            window.evicted,
            self.settings.summary_chunk_chars,
            current.as_ref(),
        )
        .await
        {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "Summarizer failed, keeping the previous summary");
                current
            }
        };

        let prompt = build_prompt(
            &self.settings.instructions,
            summary.as_ref(),
            window.retained,
            self.executor.registry().definitions(),
        );
        log.set_summary(summary);

        let mut stream = self.invoker.stream(&prompt);
        let reply = loop {
            tokio::select! {
                biased;
                () = sink.cancel_token().cancelled() => return Ok(AgentOutcome::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(ModelChunk::Fragment(text))) => sink.emit(TurnEvent::TokenFragment { text }),
                    Some(Ok(ModelChunk::Complete(reply))) => break reply,
                    Some(Err(err)) => {
                        return Ok(AgentOutcome::Failed {
                            kind: err.kind(),
                            message: err.to_string(),
                        });
                    }
                    None => {
                        return Ok(AgentOutcome::Failed {
                            kind: FailureKind::ModelTransportFailure,
                            message: "model stream ended without a reply".to_string(),
                        });
                    }
                },
            }
        };

        let mut tool_calls = reply.tool_calls;
        fresh_call_ids(log, &mut tool_calls);
        let text = reply.text;
        log.append(Turn::assistant(text.clone(), tool_calls))?;
        Ok(AgentOutcome::Reply {
            text,
            usage: reply.usage,
        })
    }

    /// NARRATE: one status line per pending call, appended as a single turn.
    fn narrate(&self, log: &mut MessageLog) -> Result<(), EngineError> {
        let lines: Vec<String> = log
            .pending_tool_calls()
            .iter()
            .map(|call| self.narration_for(call))
            .collect();
        log.append(Turn::narration(lines.join("\n")))?;
        Ok(())
    }

    /// TOOLS: run pending calls in emitted order, then commit every result at once.
    async fn tools(&self, log: &mut MessageLog, sink: &EventSink) -> Result<(), EngineError> {
        let calls = log.pending_tool_calls();
        let mut results = Vec::with_capacity(calls.len());

        for call in &calls {
            sink.emit(TurnEvent::ToolStarted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: serde_json::Value::Object(call.arguments.clone()),
                narration: self.settings.policy.narration.then(|| self.narration_for(call)),
            });

            let outcome = self
                .executor
                .invoke_with(call, |failure| {
                    sink.emit(TurnEvent::ToolRetry {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        error: failure.message.clone(),
                    });
                })
                .await;

            let (payload, error) = match &outcome.result {
                Ok(payload) => (Some(payload.clone()), None),
                Err(err) => (None, Some(err.clone())),
            };
            sink.emit(TurnEvent::ToolResult {
                call_id: outcome.call_id.clone(),
                tool_name: outcome.tool_name.clone(),
                payload,
                error,
            });
            results.push(outcome.to_turn());
        }

        log.append_all(results)?;
        Ok(())
    }

    fn narration_for(&self, call: &ToolCall) -> String {
        narrate(self.executor.registry().get(&call.name).map(|t| t.spec()), call)
    }
}

/// Replace empty or reused tool call ids so every result maps to exactly one call.
fn fresh_call_ids(log: &MessageLog, calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for call in calls {
        if call.id.is_empty() || log.knows_call(&call.id) || !seen.insert(call.id.clone()) {
            let id = format!("call_{}", Uuid::now_v7().simple());
            warn!(original = %call.id, replacement = %id, "Model reused a tool call id");
            call.id = id;
            seen.insert(call.id.clone());
        }
    }
}

fn add_usage(total: &mut Usage, used: &Usage) {
    total.input_tokens += used.input_tokens;
    total.output_tokens += used.output_tokens;
    if let Some(n) = used.cache_creation_input_tokens {
        *total.cache_creation_input_tokens.get_or_insert(0) += n;
    }
    if let Some(n) = used.cache_read_input_tokens {
        *total.cache_read_input_tokens.get_or_insert(0) += n;
    }
}
