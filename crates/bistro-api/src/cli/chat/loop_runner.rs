//! Main chat loop.
//!
//! Reads guest lines from stdin, handles slash commands, and drives one
//! engine turn per line. Ctrl+C while a turn is streaming cancels it;
//! at the prompt it only prints a hint.

use std::io::Write;

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use bistro_core::stream::TurnHandle;
use bistro_types::conversation::Node;

use crate::cli::thread::print_conversation;
use crate::http::handlers::threads::validate_thread_id;
use crate::state::AppState;

use super::banner::print_welcome_banner;
use super::commands::{self, ChatCommand};
use super::renderer::TurnRenderer;

/// Run the interactive chat loop on `thread`, or on a fresh thread.
pub async fn run_chat_loop(state: &AppState, thread: Option<String>) -> anyhow::Result<()> {
    let thread_id = match thread {
        Some(id) => {
            validate_thread_id(&id).map_err(|_| anyhow::anyhow!("invalid thread id '{id}'"))?;
            id
        }
        None => format!("cli-{}", uuid::Uuid::now_v7()),
    };

    let stored = state
        .engine
        .orchestrator()
        .checkpointer()
        .restore(&thread_id)
        .await?;
    let existing_turns = stored.as_ref().map_or(0, |c| c.conversation.turns.len());
    print_welcome_banner(&state.config.model.model, &thread_id, existing_turns);
    if stored.as_ref().is_some_and(|c| c.node != Node::End) {
        println!(
            "  {} The last reply was interrupted. Type {} to continue it.\n",
            style("!").yellow().bold(),
            style("/resume").cyan()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  {} ", style("You >").green().bold());
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n  {}", style("Press Ctrl+D to exit, or keep chatting.").dim());
                continue;
            }
        };
        let Some(line) = line else {
            println!("\n  {}", style("Session ended.").dim());
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        if let Some(cmd) = commands::parse(text) {
            match cmd {
                ChatCommand::Help => commands::print_help(),
                ChatCommand::Clear => {
                    let _ = console::Term::stdout().clear_screen();
                }
                ChatCommand::Exit => {
                    println!("\n  {}", style("Session ended.").dim());
                    break;
                }
                ChatCommand::History => match state.engine.conversation(&thread_id).await? {
                    Some(conversation) => print_conversation(&conversation),
                    None => println!("\n  {}\n", style("Nothing stored yet.").dim()),
                },
                ChatCommand::Resume => {
                    let resumable = state
                        .engine
                        .orchestrator()
                        .checkpointer()
                        .restore(&thread_id)
                        .await?
                        .is_some_and(|c| c.node != Node::End);
                    if resumable {
                        drive_turn(state.engine.resume(thread_id.as_str())).await;
                    } else {
                        println!("\n  {}\n", style("Nothing to resume.").dim());
                    }
                }
                ChatCommand::Retire => {
                    state.engine.retire(&thread_id).await?;
                    println!(
                        "\n  {} Thread {} retired.\n",
                        style("✓").green().bold(),
                        style(&thread_id).dim()
                    );
                    break;
                }
                ChatCommand::Unknown(name) => println!(
                    "\n  {} Unknown command: {}. Type /help for available commands.\n",
                    style("?").yellow().bold(),
                    style(name).dim()
                ),
            }
            continue;
        }

        drive_turn(state.engine.submit(thread_id.as_str(), text)).await;
    }

    Ok(())
}

/// Print a turn's events until it finishes, cancelling it on Ctrl+C.
async fn drive_turn(mut handle: TurnHandle) {
    let mut renderer = TurnRenderer::new();
    let mut cancelled = false;

    loop {
        let event = tokio::select! {
            event = handle.next_event() => event,
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                handle.cancel();
                renderer.mute();
                cancelled = true;
                continue;
            }
        };
        match event {
            Some(event) => renderer.print(&event),
            None => break,
        }
    }

    let (_, report) = handle.collect().await;
    print!("{}", renderer.close_reply());
    match report {
        Ok(report) if report.cancelled => {
            println!(
                "\n  {} {}\n",
                style("■").yellow(),
                style("Reply cancelled. Finished steps were kept.").dim()
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(error = %err, "turn failed");
            eprintln!("\n  {} {err}\n", style("!").red().bold());
        }
    }
}
