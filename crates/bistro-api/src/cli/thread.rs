//! Thread management commands: show, retire, list.

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;

use bistro_types::conversation::{Conversation, Node};
use bistro_types::turn::{Role, Turn, TurnKind};

use crate::state::AppState;

/// Longest tool payload shown inline.
const TOOL_PREVIEW_CHARS: usize = 160;

pub async fn show_thread(state: &AppState, thread_id: &str, json: bool) -> Result<()> {
    let Some(conversation) = state.engine.conversation(thread_id).await? else {
        bail!("thread '{thread_id}' not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&conversation)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Thread").bold(),
        style(&conversation.thread_id).cyan().bold()
    );
    println!(
        "  {}",
        style(format!(
            "started {}, {} turns",
            format_relative_time(&conversation.created_at),
            conversation.turns.len()
        ))
        .dim()
    );
    print_conversation(&conversation);
    Ok(())
}

/// Print the summary (if any) and every stored turn.
pub fn print_conversation(conversation: &Conversation) {
    println!();
    if let Some(summary) = &conversation.summary {
        println!(
            "  {} {}",
            style("Summary").magenta().bold(),
            style(format!("(covers {} turns)", summary.covered_turns)).dim()
        );
        for line in summary.text.lines() {
            println!("    {}", style(line).dim());
        }
        println!();
    }
    for turn in &conversation.turns {
        println!("{}", format_turn(turn));
    }
    println!();
}

/// One stored turn as a styled line block.
pub fn format_turn(turn: &Turn) -> String {
    match &turn.kind {
        TurnKind::Narration => format!("  ⏳ {}", style(turn.text()).dim().italic()),
        TurnKind::Failure { error } => format!(
            "  {} {} {}",
            style("!").red().bold(),
            turn.text(),
            style(format!("({error})")).dim()
        ),
        TurnKind::Message => match turn.role {
            Role::User => format!("  {} {}", style("You >").green().bold(), turn.text()),
            Role::Assistant => {
                let mut out = String::new();
                let text = turn.text();
                if !text.is_empty() {
                    out.push_str(&format!("  {} {text}", style("Host >").cyan().bold()));
                }
                for call in &turn.tool_calls {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    let args = serde_json::Value::Object(call.arguments.clone());
                    out.push_str(&format!(
                        "  {} {}({})",
                        style("→").dim(),
                        style(&call.name).yellow(),
                        args
                    ));
                }
                out
            }
            Role::Tool => {
                let id = turn.tool_call_id.as_deref().unwrap_or("?");
                match &turn.tool_error {
                    Some(error) => format!(
                        "  {} {} {}",
                        style("✗").red(),
                        style(id).dim(),
                        error.message
                    ),
                    None => format!(
                        "  {} {} {}",
                        style("←").dim(),
                        style(id).dim(),
                        truncate(&turn.text(), TOOL_PREVIEW_CHARS)
                    ),
                }
            }
            Role::System => format!("  {} {}", style("System").magenta(), turn.text()),
        },
    }
}

pub async fn retire_thread(state: &AppState, thread_id: &str, force: bool, json: bool) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete the checkpoint of thread '{}'?",
                style(thread_id).red().bold()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    if !state.engine.retire(thread_id).await? {
        bail!("thread '{thread_id}' not found");
    }

    if json {
        println!("{}", serde_json::json!({"retired": true, "thread_id": thread_id}));
    } else {
        println!();
        println!(
            "  {} Thread {} retired.",
            style("✓").green().bold(),
            style(thread_id).cyan()
        );
        println!();
    }
    Ok(())
}

pub async fn list_threads(state: &AppState, json: bool) -> Result<()> {
    let threads = state.engine.threads().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }

    if threads.is_empty() {
        println!();
        println!(
            "  {} No threads yet. Start one with: {}",
            style("i").blue().bold(),
            style("bistro chat").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Thread").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Turns").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for thread in &threads {
        let state_cell = match thread.node {
            Node::End => Cell::new("● idle").fg(Color::Green),
            node => Cell::new(format!("◌ interrupted at {node}")).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&thread.thread_id),
            state_cell,
            Cell::new(thread.turns),
            Cell::new(format_relative_time(&thread.updated_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let diff = chrono::Utc::now() - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_types::error::FailureKind;
    use bistro_types::turn::ToolCall;
    use serde_json::json;

    #[test]
    fn test_format_assistant_tool_call() {
        let turn = Turn::assistant(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "availability".into(),
                arguments: json!({"date": "2026-10-16", "partySize": 2})
                    .as_object()
                    .cloned()
                    .unwrap(),
            }],
        );
        let line = format_turn(&turn);
        assert!(line.contains("availability"));
        assert!(line.contains("\"partySize\":2"));
        assert!(!line.contains("Host >"));
    }

    #[test]
    fn test_format_narration_and_failure() {
        assert!(format_turn(&Turn::narration("Checking the menu")).contains("Checking the menu"));
        let failure = format_turn(&Turn::failure(FailureKind::LoopBoundExceeded, "Too many steps"));
        assert!(failure.contains("Too many steps"));
        assert!(failure.contains("loop_bound_exceeded"));
    }

    #[test]
    fn test_relative_time_and_truncate() {
        let now = chrono::Utc::now();
        assert_eq!(format_relative_time(&now), "just now");
        assert_eq!(format_relative_time(&(now - chrono::Duration::hours(3))), "3h ago");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
