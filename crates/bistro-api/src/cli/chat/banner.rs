//! Welcome banner display for chat sessions.

use console::style;

/// Print the banner at the start of a chat session.
///
/// `existing_turns` is zero for a new thread.
pub fn print_welcome_banner(model: &str, thread_id: &str, existing_turns: usize) {
    println!();
    println!("  🍽  {}", style("The Modern Fork").cyan().bold());
    println!("  {}", style("Reservations and menu questions").dim());
    println!();
    println!("  {}   {}", style("Model:").bold(), style(model).dim());
    println!("  {}  {}", style("Thread:").bold(), style(thread_id).dim());
    if existing_turns > 0 {
        println!(
            "  {} {}",
            style("Resuming:").bold(),
            style(format!("{existing_turns} stored turns")).dim()
        );
    }
    println!();
    println!(
        "  {}",
        style("Type /help for commands, Ctrl+C cancels a reply, Ctrl+D exits").dim()
    );
    println!("  {}", style("---").dim());
    println!();
}
