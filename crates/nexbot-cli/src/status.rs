//! Status command — configuration and session-store summary.

use anyhow::Result;
use colored::Colorize;

use nexbot_core::config::load_config;
use nexbot_core::utils;

use crate::helpers;

pub fn run() -> Result<()> {
    let config = load_config(None);

    helpers::print_banner();
    println!();
    println!("{}", "Configuration".bold());
    println!("  Provider:       {}", display_or_dash(&config.provider));
    let configured = config
        .providers
        .get(&config.provider)
        .map(|p| p.is_configured())
        .unwrap_or(false);
    println!(
        "  API key:        {}",
        if configured {
            "configured".green().to_string()
        } else {
            "missing".red().to_string()
        }
    );
    println!("  Model:          {}", config.agent.model);
    println!("  Max iterations: {}", config.agent.max_iterations);
    println!("  Workspace:      {}", config.workspace);

    let sessions_dir = if config.sessions.dir.is_empty() {
        utils::get_sessions_path()
    } else {
        helpers::expand_tilde(&config.sessions.dir)
    };
    println!();
    println!("{}", "Sessions".bold());
    println!("  Directory: {}", sessions_dir.display());

    let (count, bytes) = session_stats(&sessions_dir);
    println!("  Stored:    {count} ({})", utils::human_size(bytes));
    println!();
    Ok(())
}

fn display_or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".into()
    } else {
        s.to_string()
    }
}

/// Count session files and their total size, tolerating a missing dir.
fn session_stats(dir: &std::path::Path) -> (usize, u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, 0);
    };
    let mut count = 0;
    let mut bytes = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            count += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (count, bytes)
}
