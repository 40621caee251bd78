//! Interactive REPL — the adapter-free driver.
//!
//! Publishes the typed line as an inbound `cli` message and prints the
//! outbound reply. Slash commands (`/new`, `/status`, `/restart`) go out
//! as command metadata, exercising the same routing a channel adapter
//! would use.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use nexbot_agent::Orchestrator;
use nexbot_core::bus::types::COMMAND_METADATA_KEY;
use nexbot_core::bus::InboundMessage;
use nexbot_core::config::load_config;

use crate::helpers;

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// How long a REPL turn waits for the reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run(session: &str) -> Result<()> {
    let config = load_config(None);

    let orchestrator = Arc::new(Orchestrator::new(config));
    orchestrator.initialize().await?;
    orchestrator.start_message_processing().await?;

    helpers::print_banner();
    println!("  Session: {session}");
    println!("  Type a message, \"/new\" to reset, or \"exit\" to quit.");
    println!();

    let mut editor = create_editor()?;

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
            println!("\nGoodbye! 👋");
            break;
        }
        let _ = editor.add_history_entry(&input);

        let msg = build_inbound(session, trimmed);
        let reply = exchange(&orchestrator, msg).await;
        match reply {
            Some(text) => helpers::print_response(&text),
            None => eprintln!("\n❌ No reply (timed out)\n"),
        }
    }

    save_history(&mut editor);
    orchestrator.shutdown().await;
    Ok(())
}

/// Map slash commands onto the bus metadata contract.
fn build_inbound(session: &str, input: &str) -> InboundMessage {
    let command = match input {
        "/new" => Some("new_session"),
        "/status" => Some("status"),
        "/restart" => Some("restart"),
        _ => None,
    };

    let msg = InboundMessage::new("cli", "local", session, if command.is_some() { "" } else { input });
    match command {
        Some(c) => msg.with_metadata(COMMAND_METADATA_KEY, c),
        None => msg,
    }
}

/// Publish one inbound message and wait for the reply on this session.
async fn exchange(orchestrator: &Arc<Orchestrator>, msg: InboundMessage) -> Option<String> {
    let bus = orchestrator.bus().await?;
    let mut outbound = bus.subscribe_outbound();
    let session_id = msg.session_id.clone();

    debug!(session = %session_id, "publishing repl input");
    bus.publish_inbound(msg).ok()?;

    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    loop {
        let reply = tokio::time::timeout_at(deadline, outbound.recv()).await.ok()??;
        if reply.session_id == session_id {
            return Some(reply.content);
        }
    }
}

fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }
    Ok(editor)
}

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
    nexbot_core::utils::get_data_path()
        .join("history")
        .join("cli_history")
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}
