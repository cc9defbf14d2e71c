//! Slash command parsing for the chat loop.

use console::style;

/// Available slash commands in the chat loop.
#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    Help,
    /// Clear the terminal screen.
    Clear,
    Exit,
    /// Print the stored conversation for this thread.
    History,
    /// Continue a turn that was interrupted before it finished.
    Resume,
    /// Delete this thread's checkpoint and end the session.
    Retire,
    Unknown(String),
}

/// Parse user input as a slash command.
///
/// Returns `None` if the input doesn't start with `/`.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let cmd = trimmed
        .split_whitespace()
        .next()
        .unwrap_or(trimmed)
        .to_lowercase();

    match cmd.as_str() {
        "/help" | "/h" | "/?" => Some(ChatCommand::Help),
        "/clear" | "/cls" => Some(ChatCommand::Clear),
        "/exit" | "/quit" | "/q" => Some(ChatCommand::Exit),
        "/history" => Some(ChatCommand::History),
        "/resume" => Some(ChatCommand::Resume),
        "/retire" => Some(ChatCommand::Retire),
        other => Some(ChatCommand::Unknown(other.to_string())),
    }
}

/// Print the help text listing all available commands.
pub fn print_help() {
    println!();
    println!("  {}", style("Available commands:").bold());
    println!();
    println!("  {}     Show this help message", style("/help").cyan());
    println!("  {}    Clear the screen", style("/clear").cyan());
    println!("  {}  Show the stored conversation", style("/history").cyan());
    println!("  {}   Continue an interrupted reply", style("/resume").cyan());
    println!("  {}   Delete this thread and exit", style("/retire").cyan());
    println!("  {}     End the chat session", style("/exit").cyan());
    println!();
    println!(
        "  {}",
        style("Ctrl+C cancels a reply in progress; finished tool results are kept").dim()
    );
    println!();
}
