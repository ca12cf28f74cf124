//! Shared CLI helpers: response printing, stage summaries, version banner.

use colored::Colorize;

use agentmesh_agent::Stage;
use agentmesh_core::utils::truncate_string;

/// Longest stage result shown inline before it is shortened.
const STAGE_PREVIEW_CHARS: usize = 200;

/// Print an agent answer to stdout.
pub fn print_response(response: &str) {
    println!();
    println!("{}", "AgentMesh".cyan().bold());
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
    println!();
}

/// Print a terminal failure message.
pub fn print_failure(message: &str) {
    eprintln!();
    eprintln!("{} {}", "✗".red().bold(), message);
    eprintln!();
}

/// Print one line per capability stage.
pub fn print_stages(stages: &[Stage]) {
    for line in stages.iter().map(stage_line) {
        println!("{line}");
    }
}

fn stage_line(stage: &Stage) -> String {
    let marker = if stage.failed {
        "✗".red().to_string()
    } else {
        "✓".green().to_string()
    };
    format!(
        "  {} {} {} → {}",
        marker,
        stage.capability.bold(),
        stage.arguments.dimmed(),
        truncate_string(&first_line(&stage.result), STAGE_PREVIEW_CHARS)
    )
}

/// First line of a possibly multi-line text.
pub fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// Print the banner shown at REPL and gateway start.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "AgentMesh".cyan().bold(), version.dimmed());
    println!();
}

/// Print a "thinking" placeholder while a turn runs.
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_of_multiline() {
        assert_eq!(first_line("Searches the web.\nMore detail."), "Searches the web.");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn stage_line_shortens_long_results() {
        colored::control::set_override(false);
        let stage = Stage {
            capability: "web_search".into(),
            arguments: r#"{"query":"rust"}"#.into(),
            result: "x".repeat(500),
            failed: false,
        };
        let line = stage_line(&stage);
        assert!(line.contains("web_search"));
        assert!(line.ends_with("..."));
        assert!(line.chars().count() < 300);
    }

    #[test]
    fn stage_line_marks_failures() {
        colored::control::set_override(false);
        let stage = Stage {
            capability: "simple_calculator".into(),
            arguments: "{}".into(),
            result: "Error: Division by zero".into(),
            failed: true,
        };
        assert!(stage_line(&stage).contains('✗'));
    }
}
