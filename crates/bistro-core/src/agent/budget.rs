//! Token-budgeted trimming of a turn sequence.
//!
//! `trim_to_budget` keeps the longest suffix of turns that fits the budget
//! together with the leading system turn. When anything is dropped the
//! suffix is advanced to its first user turn, so the window never opens
//! on an assistant reply or a tool result whose call was cut off. Turns
//! are never split.

use bistro_types::turn::{Role, Turn};

use super::token_counter::TokenCounter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("system turn needs {system_tokens} tokens but the budget is {budget}")]
    Unsatisfiable { system_tokens: usize, budget: usize },
}

/// A trimmed view over a turn slice. Borrows; never copies the log.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub system: Option<&'a Turn>,
    /// Turns before the retained suffix, oldest first.
    pub evicted: &'a [Turn],
    pub retained: &'a [Turn],
    /// Tokens of the system turn plus the retained suffix.
    pub tokens: usize,
}

impl Window<'_> {
    pub fn is_trimmed(&self) -> bool {
        !self.evicted.is_empty()
    }
}

/// Trim `turns` to fit `budget` tokens.
///
/// A system turn in first position is always kept. Fails only when that
/// system turn alone exceeds the budget.
pub fn trim_to_budget<'a>(
    turns: &'a [Turn],
    budget: usize,
    counter: &dyn TokenCounter,
) -> Result<Window<'a>, BudgetError> {
    let (system, rest) = match turns.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, turns),
    };

    let system_tokens = system.map_or(0, |t| counter.count_turn(t));
    if system_tokens > budget {
        return Err(BudgetError::Unsatisfiable {
            system_tokens,
            budget,
        });
    }
    let available = budget - system_tokens;

    let mut start = rest.len();
    let mut used = 0;
    for (index, turn) in rest.iter().enumerate().rev() {
        let cost = counter.count_turn(turn);
        if used + cost > available {
            break;
        }
        used += cost;
        start = index;
    }

    if start > 0 {
        while start < rest.len() && rest[start].role != Role::User {
            used -= counter.count_turn(&rest[start]);
            start += 1;
        }
    }

    Ok(Window {
        system,
        evicted: &rest[..start],
        retained: &rest[start..],
        tokens: system_tokens + used,
    })
}
