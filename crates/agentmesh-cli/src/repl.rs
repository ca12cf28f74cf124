//! Interactive REPL.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! The conversation lives in memory for the session and is sent whole on
//! every turn, the same way a chat client talks to the gateway.

use anyhow::Result;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use agentmesh_agent::{ChatOutcome, RequestHandler, ResponseChoice};
use agentmesh_core::types::{ChatRequest, Message};

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Clears the in-memory conversation.
const RESET_COMMAND: &str = "/reset";

/// Run the interactive REPL loop.
pub async fn run(handler: RequestHandler, show_stages: bool) -> Result<()> {
    helpers::print_banner();
    println!("Type a message, \"{RESET_COMMAND}\" to start over, or \"exit\" to quit.");
    println!();

    let mut editor = create_editor()?;
    let mut conversation = Conversation::default();

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye!");
            break;
        }
        let _ = editor.add_history_entry(&input);

        if trimmed.eq_ignore_ascii_case(RESET_COMMAND) {
            conversation.clear();
            println!("(conversation cleared)\n");
            continue;
        }

        debug!(turns = conversation.len(), "processing input");
        helpers::print_thinking();

        let mut choice = ResponseChoice::new();
        let request = ChatRequest {
            messages: conversation.with_user(trimmed),
            ..Default::default()
        };
        let outcome = handler.handle(request, &mut choice).await;
        helpers::clear_thinking();
        if show_stages {
            helpers::print_stages(choice.stages());
        }

        match outcome {
            ChatOutcome::Answer(answer) => {
                helpers::print_response(&answer);
                conversation.record(trimmed, answer);
            }
            ChatOutcome::Failure(_) => helpers::print_failure(&outcome.message()),
        }
    }

    save_history(&mut editor);
    Ok(())
}

/// User/assistant exchanges of the current session.
///
/// A failed turn leaves no trace, so the next attempt starts from the same
/// history.
#[derive(Default)]
struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    fn len(&self) -> usize {
        self.messages.len()
    }

    fn clear(&mut self) {
        self.messages.clear();
    }

    /// History plus the pending user message.
    fn with_user(&self, text: &str) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.push(Message::user(text));
        messages
    }

    fn record(&mut self, user: &str, answer: String) {
        self.messages.push(Message::user(user));
        self.messages.push(Message::assistant(answer));
    }
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded REPL history from {}", history_path.display());
    }

    Ok(editor)
}

/// Save history to disk.
fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

fn history_path() -> std::path::PathBuf {
    agentmesh_core::utils::get_data_path()
        .join("history")
        .join("repl_history")
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("EXIT"));
        assert!(is_exit_command("/quit"));
        assert!(is_exit_command(":q"));
        assert!(!is_exit_command("hello"));
        assert!(!is_exit_command(""));
    }

    #[test]
    fn history_path_under_data_dir() {
        let path = history_path();
        assert!(path.to_string_lossy().contains(".agentmesh"));
        assert!(path.ends_with("history/repl_history"));
    }

    #[test]
    fn conversation_grows_only_on_answers() {
        let mut conversation = Conversation::default();
        let first = conversation.with_user("what is 2+3?");
        assert_eq!(first, vec![Message::user("what is 2+3?")]);

        conversation.record("what is 2+3?", "5".into());
        let second = conversation.with_user("and times 4?");
        assert_eq!(second.len(), 3);
        assert_eq!(second[1], Message::assistant("5"));
        assert_eq!(conversation.len(), 2);

        conversation.clear();
        assert_eq!(conversation.len(), 0);
    }
}
