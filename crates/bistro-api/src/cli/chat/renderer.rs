//! Terminal rendering of turn events.
//!
//! Fragments are printed raw as they stream in; tool progress and
//! failures are printed on their own lines. The renderer tracks whether
//! the cursor is mid-reply so status lines never land inside host text.

use std::io::Write;
use std::time::Instant;

use console::style;

use bistro_types::event::TurnEvent;

/// Stateful renderer for one turn.
pub struct TurnRenderer {
    started: Instant,
    /// A reply line is open and needs a newline before the next status line.
    mid_reply: bool,
    /// Fragments after a cancel are swallowed.
    muted: bool,
}

impl Default for TurnRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnRenderer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            mid_reply: false,
            muted: false,
        }
    }

    /// Stop printing fragments; status lines still appear.
    pub fn mute(&mut self) {
        self.muted = true;
    }

    /// Render `event` and write it to stdout.
    pub fn print(&mut self, event: &TurnEvent) {
        let out = self.render(event);
        if !out.is_empty() {
            print!("{out}");
            let _ = std::io::stdout().flush();
        }
    }

    /// Text for `event`, without writing it.
    pub fn render(&mut self, event: &TurnEvent) -> String {
        match event {
            TurnEvent::TokenFragment { text } => {
                if self.muted {
                    return String::new();
                }
                if self.mid_reply {
                    text.clone()
                } else {
                    self.mid_reply = true;
                    format!("\n  {} {text}", style("Host >").cyan().bold())
                }
            }
            TurnEvent::ToolStarted {
                tool_name,
                narration,
                ..
            } => {
                let label = narration.as_deref().unwrap_or(tool_name.as_str());
                self.status_line(format!("  ⏳ {}", style(format!("{label}...")).dim()))
            }
            TurnEvent::ToolRetry {
                tool_name, error, ..
            } => self.status_line(format!(
                "  {} {} failed ({}), retrying",
                style("↻").yellow().bold(),
                style(tool_name).yellow(),
                style(error).dim()
            )),
            TurnEvent::ToolResult {
                tool_name, error, ..
            } => match error {
                Some(error) => self.status_line(format!(
                    "  {} {}: {}",
                    style("✗").red().bold(),
                    style(tool_name).red(),
                    error.message
                )),
                None => self.status_line(format!(
                    "  {} {}",
                    style("✓").green(),
                    style(tool_name).dim()
                )),
            },
            TurnEvent::TurnComplete {
                round_trips, usage, ..
            } => {
                let seconds = self.started.elapsed().as_secs_f64();
                let tokens = usage
                    .as_ref()
                    .map(|u| u.input_tokens + u.output_tokens)
                    .unwrap_or(0);
                let mut out = self.close_reply();
                out.push_str(&format!(
                    "\n  {} {} tokens {} {} tool rounds {} {:.1}s\n\n",
                    style("|").dim(),
                    style(tokens).dim(),
                    style("\u{00b7}").dim(),
                    style(round_trips).dim(),
                    style("\u{00b7}").dim(),
                    style(seconds).dim(),
                ));
                out
            }
            TurnEvent::Error { kind, message } => {
                let mut out = self.close_reply();
                out.push_str(&format!(
                    "\n  {} {} {}\n\n",
                    style("!").red().bold(),
                    message,
                    style(format!("({kind})")).dim()
                ));
                out
            }
        }
    }

    /// Newline ending an open reply, if any.
    pub fn close_reply(&mut self) -> String {
        if self.mid_reply {
            self.mid_reply = false;
            "\n".to_string()
        } else {
            String::new()
        }
    }

    fn status_line(&mut self, line: String) -> String {
        let mut out = self.close_reply();
        out.push_str(&line);
        out.push('\n');
        out
    }
}
