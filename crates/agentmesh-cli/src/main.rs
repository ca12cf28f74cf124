//! AgentMesh CLI entry point.
//!
//! # Commands
//!
//! - `agentmesh serve` runs the HTTP gateway for this agent's deployment
//! - `agentmesh ask [-m MESSAGE]` chats with the agent (single-shot or REPL)
//! - `agentmesh capabilities` discovers and lists every capability

mod gateway;
mod helpers;
mod repl;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use agentmesh_agent::{ChatOutcome, RequestHandler, ResponseChoice};
use agentmesh_core::config::{load_config, Config};
use agentmesh_core::types::ChatRequest;
use agentmesh_providers::create_provider;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// AgentMesh: tool-using agents that call each other as capabilities
#[derive(Parser)]
#[command(name = "agentmesh", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve this agent over HTTP
    Serve {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Chat with the agent (single-shot or interactive REPL)
    Ask {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Print each capability stage as it completes
        #[arg(long, default_value_t = false)]
        stages: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Discover tool servers and list every capability
    Capabilities {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(None);

    match cli.command {
        Commands::Serve { logs } => {
            init_logging(logs);
            gateway::run(config).await
        }
        Commands::Ask {
            message,
            stages,
            logs,
        } => {
            init_logging(logs);
            run_ask(&config, message, stages).await
        }
        Commands::Capabilities { logs } => {
            init_logging(logs);
            list_capabilities(&config).await
        }
    }
}

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

async fn run_ask(config: &Config, message: Option<String>, show_stages: bool) -> Result<()> {
    let handler = build_handler(config)?;

    match message {
        Some(msg) => {
            info!(deployment = %config.agent.deployment_name, "processing single message");
            let mut choice = ResponseChoice::new();
            helpers::print_thinking();
            let outcome = handler.handle(ChatRequest::single(msg), &mut choice).await;
            helpers::clear_thinking();
            if show_stages {
                helpers::print_stages(choice.stages());
            }
            match outcome {
                ChatOutcome::Answer(answer) => helpers::print_response(&answer),
                ChatOutcome::Failure(_) => helpers::print_failure(&outcome.message()),
            }
        }
        None => repl::run(handler, show_stages).await?,
    }

    Ok(())
}

async fn list_capabilities(config: &Config) -> Result<()> {
    let handler = build_handler(config)?;
    handler
        .ensure_discovered()
        .await
        .context("capability discovery failed")?;

    let capabilities = handler.registry().list();
    println!();
    println!(
        "{} {}",
        config.agent.deployment_name.cyan().bold(),
        format!("({} capabilities)", capabilities.len()).dimmed()
    );
    for cap in capabilities {
        println!(
            "  {:<28} {:<7} {}",
            cap.name().bold(),
            cap.kind_label().yellow(),
            helpers::first_line(cap.description())
        );
    }
    for server in handler.tool_servers() {
        println!(
            "  {} {}",
            format!("tool server '{}':", server.name()).dimmed(),
            format!("{} tools", server.catalog().len()).dimmed()
        );
    }
    println!();
    Ok(())
}

/// Build a `RequestHandler` from the loaded configuration.
pub fn build_handler(config: &Config) -> Result<RequestHandler> {
    let provider = create_provider(&config.provider, &config.agent.model)
        .context("failed to configure the reasoning provider")?;
    RequestHandler::from_config(config, Arc::new(provider))
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("agentmesh=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
