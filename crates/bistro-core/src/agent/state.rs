//! Transition function of the orchestration state machine.
//!
//! Nodes do the work; this module only decides where to go next. It reads
//! a small [`Observation`] of the log taken after a node finished and
//! never touches the log itself, so every edge can be tested without a
//! model or tools.

use bistro_types::config::EngineConfig;
use bistro_types::conversation::Node;
use bistro_types::error::FailureKind;
use bistro_types::turn::Role;

use crate::thread::MessageLog;

/// Loop-safety and narration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    /// AGENT to TOOLS round trips allowed per external message.
    pub max_round_trips: u32,
    pub narration: bool,
}

impl LoopPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_round_trips: config.max_round_trips,
            narration: config.narration,
        }
    }
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_round_trips: 10,
            narration: true,
        }
    }
}

/// What the transition function needs to know about the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    /// Tool calls of the latest assistant message still lacking a result.
    pub pending_calls: usize,
    /// The latest prompt-visible turn is a tool result.
    pub awaiting_interpretation: bool,
}

impl Observation {
    pub fn of(log: &MessageLog) -> Self {
        let awaiting_interpretation = log
            .turns()
            .iter()
            .rev()
            .find(|t| t.is_message())
            .is_some_and(|t| t.role == Role::Tool);
        Self {
            pending_calls: log.pending_tool_calls().len(),
            awaiting_interpretation,
        }
    }
}

/// Outcome of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Go(Node),
    /// Stop the turn with a failure; the machine moves to END.
    Halt(FailureKind),
}

/// Decide the node after `node` has run.
///
/// `round_trips` is the number of TOOLS executions so far for the current
/// external message.
pub fn transition(node: Node, observed: Observation, round_trips: u32, policy: LoopPolicy) -> Step {
    match node {
        Node::Agent if observed.pending_calls > 0 => {
            if round_trips >= policy.max_round_trips {
                Step::Halt(FailureKind::LoopBoundExceeded)
            } else if policy.narration {
                Step::Go(Node::Narrate)
            } else {
                Step::Go(Node::Tools)
            }
        }
        Node::Agent if observed.awaiting_interpretation => Step::Go(Node::Agent),
        Node::Agent => Step::Go(Node::End),
        Node::Narrate => Step::Go(Node::Tools),
        Node::Tools => Step::Go(Node::Agent),
        Node::End => Step::Go(Node::End),
    }
}

/// Round-trip counter after moving from `from` to `to`.
///
/// A round trip is counted on every entry into TOOLS.
pub fn count_round_trip(to: Node, round_trips: u32) -> u32 {
    if to == Node::Tools {
        round_trips + 1
    } else {
        round_trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_types::conversation::Conversation;
    use bistro_types::turn::{ToolCall, Turn};

    fn pending(n: usize) -> Observation {
        Observation {
            pending_calls: n,
            awaiting_interpretation: false,
        }
    }

    #[test]
    fn test_agent_with_calls_narrates_first() {
        let policy = LoopPolicy::default();
        assert_eq!(transition(Node::Agent, pending(1), 0, policy), Step::Go(Node::Narrate));
        assert_eq!(transition(Node::Narrate, pending(1), 0, policy), Step::Go(Node::Tools));

        let quiet = LoopPolicy {
            narration: false,
            ..policy
        };
        assert_eq!(transition(Node::Agent, pending(2), 0, quiet), Step::Go(Node::Tools));
    }

    #[test]
    fn test_agent_without_calls_ends() {
        assert_eq!(
            transition(Node::Agent, pending(0), 3, LoopPolicy::default()),
            Step::Go(Node::End)
        );
    }

    #[test]
    fn test_tool_result_needs_another_agent_pass() {
        let observed = Observation {
            pending_calls: 0,
            awaiting_interpretation: true,
        };
        assert_eq!(
            transition(Node::Agent, observed, 1, LoopPolicy::default()),
            Step::Go(Node::Agent)
        );
        assert_eq!(
            transition(Node::Tools, observed, 1, LoopPolicy::default()),
            Step::Go(Node::Agent)
        );
    }

    #[test]
    fn test_loop_bound_halts_at_limit() {
        let policy = LoopPolicy {
            max_round_trips: 10,
            narration: false,
        };
        assert_eq!(transition(Node::Agent, pending(1), 9, policy), Step::Go(Node::Tools));
        assert_eq!(
            transition(Node::Agent, pending(1), 10, policy),
            Step::Halt(FailureKind::LoopBoundExceeded)
        );
    }

    #[test]
    fn test_machine_always_terminates_under_a_tool_happy_model() {
        // A model that always calls a tool: walk the edges until END.
        let policy = LoopPolicy::default();
        let (mut node, mut round_trips, mut steps) = (Node::Agent, 0, 0);
        loop {
            steps += 1;
            assert!(steps < 100, "state machine did not terminate");
            match transition(node, pending(1), round_trips, policy) {
                Step::Go(Node::End) | Step::Halt(_) => break,
                Step::Go(next) => {
                    round_trips = count_round_trip(next, round_trips);
                    node = next;
                }
            }
        }
        assert_eq!(round_trips, policy.max_round_trips);
    }

    #[test]
    fn test_observation_of_log() {
        let mut log = MessageLog::new(Conversation::new("t"));
        log.append(Turn::user("table for 2")).unwrap();
        let call = ToolCall {
            id: "call_1".into(),
            name: "availability".into(),
            arguments: serde_json::Map::new(),
        };
        log.append(Turn::assistant("", vec![call])).unwrap();
        log.append(Turn::narration("Checking tables")).unwrap();
        assert_eq!(Observation::of(&log), pending(1));

        log.append(Turn::tool_result("call_1", &serde_json::json!({}))).unwrap();
        let observed = Observation::of(&log);
        assert_eq!(observed.pending_calls, 0);
        assert!(observed.awaiting_interpretation);
    }

    #[test]
    fn test_end_is_terminal() {
        assert_eq!(
            transition(Node::End, pending(1), 0, LoopPolicy::default()),
            Step::Go(Node::End)
        );
        assert_eq!(count_round_trip(Node::Agent, 4), 4);
        assert_eq!(count_round_trip(Node::Tools, 4), 5);
    }
}
