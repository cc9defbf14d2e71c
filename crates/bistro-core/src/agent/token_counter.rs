//! Pluggable token counting.
//!
//! The budgeter never talks to a tokenizer directly; it asks a
//! [`TokenCounter`]. Counts only need to be consistent, not exact.

use std::sync::Arc;

use bistro_types::config::CounterKind;
use bistro_types::turn::Turn;

/// Counts tokens in text and in whole turns.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Tokens for one turn. Multi-part content is summed part by part.
    fn count_turn(&self, turn: &Turn) -> usize {
        turn.content.segments().iter().map(|s| self.count(s)).sum()
    }
}

/// ~4 characters per token, rounded up.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimateCounter {
    pub chars_per_token: usize,
}

impl Default for CharEstimateCounter {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl TokenCounter for CharEstimateCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token.max(1))
    }
}

/// Every turn is one unit, so the budget becomes a message count.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnCountCounter;

impl TokenCounter for TurnCountCounter {
    fn count(&self, text: &str) -> usize {
        usize::from(!text.is_empty())
    }

    fn count_turn(&self, _turn: &Turn) -> usize {
        1
    }
}

pub fn counter_for(kind: CounterKind) -> Arc<dyn TokenCounter> {
    match kind {
        CounterKind::Chars => Arc::new(CharEstimateCounter::default()),
        CounterKind::Turns => Arc::new(TurnCountCounter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_types::turn::{ContentPart, TurnContent};

    #[test]
    fn test_char_estimate_rounds_up() {
        let counter = CharEstimateCounter::default();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abc"), 1);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn test_multi_part_turn_sums_parts() {
        let counter = CharEstimateCounter::default();
        let mut turn = Turn::user("");
        turn.content = TurnContent::Parts(vec![
            ContentPart::Text { text: "abcde".into() },
            ContentPart::Text { text: "abcde".into() },
        ]);
        // each part rounds up on its own
        assert_eq!(counter.count_turn(&turn), 4);
    }

    #[test]
    fn test_turn_counter_counts_turns() {
        let counter = counter_for(CounterKind::Turns);
        assert_eq!(counter.count_turn(&Turn::user("a very long message indeed")), 1);
        assert_eq!(counter.count_turn(&Turn::assistant("", vec![])), 1);
    }
}
