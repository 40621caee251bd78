//! Context builder — assembles the system prompt from bootstrap sources,
//! memory, and session scope.
//!
//! Sources are a fixed ordered list of workspace files, each optional,
//! joined with a fixed delimiter. Before emission, `{{NAME}}` placeholders
//! are substituted from a recognized set; unknown placeholders pass
//! through untouched.

use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use nexbot_core::types::Message;

/// Files injected into the system prompt when present in the workspace
/// root, in this order.
pub const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

/// Delimiter between prompt sections.
const SECTION_DELIMITER: &str = "\n\n---\n\n";

/// Memory file read by [`ContextBuilder::build_with_memory`].
const MEMORY_FILE: &str = "MEMORY.md";

/// How many trailing messages the memory section summarizes.
const MEMORY_RECENT_MESSAGES: usize = 6;

// ─────────────────────────────────────────────
// ContextBuilder
// ─────────────────────────────────────────────

/// Builds system prompts for the agent loop.
pub struct ContextBuilder {
    workspace: PathBuf,
    timezone: Option<String>,
    memory_dir: Option<PathBuf>,
    user_name: Option<String>,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            timezone: None,
            memory_dir: None,
            user_name: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_memory_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.memory_dir = Some(dir.into());
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    // ────────────── Assembly ──────────────

    /// Concatenate the bootstrap sources (identity header first), with
    /// placeholder substitution applied.
    pub fn build(&self) -> String {
        let mut parts: Vec<String> = vec![self.identity()];

        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if path.is_file() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    debug!(file = filename, "loaded bootstrap file");
                    parts.push(format!("## {filename}\n\n{content}"));
                }
            }
        }

        self.substitute(&parts.join(SECTION_DELIMITER))
    }

    /// [`build`](Self::build) plus a memory section: the long-term memory
    /// file (when configured and present) and a short recap of the most
    /// recent messages.
    pub fn build_with_memory(&self, messages: &[Message]) -> String {
        let mut prompt = self.build();

        let mut memory_parts: Vec<String> = Vec::new();
        if let Some(ref dir) = self.memory_dir {
            let path = dir.join(MEMORY_FILE);
            if let Ok(content) = std::fs::read_to_string(&path) {
                if !content.trim().is_empty() {
                    memory_parts.push(format!("## Long-term Memory\n\n{content}"));
                }
            }
        }

        if !messages.is_empty() {
            let recent: Vec<String> = messages
                .iter()
                .rev()
                .take(MEMORY_RECENT_MESSAGES)
                .filter_map(|m| m.text().map(|t| format!("- {}: {}", m.role(), t)))
                .collect();
            if !recent.is_empty() {
                let recap: Vec<String> = recent.into_iter().rev().collect();
                memory_parts.push(format!("## Recent Conversation\n\n{}", recap.join("\n")));
            }
        }

        if !memory_parts.is_empty() {
            prompt.push_str(SECTION_DELIMITER);
            prompt.push_str("# Memory\n\n");
            prompt.push_str(&memory_parts.join("\n\n"));
        }
        prompt
    }

    /// [`build_with_memory`](Self::build_with_memory) plus a header scoping
    /// the prompt to one session.
    pub fn build_for_session(&self, session_id: &str, messages: &[Message]) -> String {
        let mut prompt = self.build_with_memory(messages);
        prompt.push_str(&format!(
            "\n\n## Current Session\nSession ID: {session_id}\nMessages so far: {}",
            messages.len()
        ));
        prompt
    }

    // ────────────── Placeholders ──────────────

    /// Replace recognized `{{NAME}}` placeholders; unknown names are left
    /// intact.
    fn substitute(&self, text: &str) -> String {
        let now = Utc::now();
        let mut out = text
            .replace(
                "{{CURRENT_TIME}}",
                &now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            )
            .replace("{{CURRENT_DATE}}", &now.format("%Y-%m-%d").to_string())
            .replace(
                "{{WORKSPACE_PATH}}",
                &self.workspace.display().to_string(),
            );

        if let Some(ref name) = self.user_name {
            out = out.replace("{{USER_NAME}}", name);
        }
        if let Some(ref tz) = self.timezone {
            out = out.replace("{{USER_TIMEZONE}}", tz);
        }
        out
    }

    fn identity(&self) -> String {
        "# Nexbot\n\n\
         You are **Nexbot**, a conversational assistant reachable over chat channels.\n\n\
         - **Date/time**: {{CURRENT_TIME}}\n\
         - **Workspace**: `{{WORKSPACE_PATH}}`\n\n\
         Use your tools when they help; be concise and direct."
            .to_string()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_identity_substituted() {
        let dir = tempdir().unwrap();
        let ctx = ContextBuilder::new(dir.path());
        let prompt = ctx.build();

        assert!(prompt.contains("Nexbot"));
        assert!(prompt.contains(dir.path().to_str().unwrap()));
        assert!(!prompt.contains("{{WORKSPACE_PATH}}"));
        assert!(!prompt.contains("{{CURRENT_TIME}}"));
    }

    #[test]
    fn test_bootstrap_files_in_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "soul content").unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "agents content").unwrap();

        let prompt = ContextBuilder::new(dir.path()).build();
        let agents_at = prompt.find("agents content").unwrap();
        let soul_at = prompt.find("soul content").unwrap();
        assert!(agents_at < soul_at, "AGENTS.md comes before SOUL.md");
        assert!(prompt.contains("\n\n---\n\n"));
    }

    #[test]
    fn test_missing_bootstrap_files_not_an_error() {
        let dir = tempdir().unwrap();
        let prompt = ContextBuilder::new(dir.path()).build();
        assert!(!prompt.is_empty());
    }

    #[test]
    fn test_placeholder_substitution_in_bootstrap() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("USER.md"),
            "Today is {{CURRENT_DATE}} in {{WORKSPACE_PATH}}.",
        )
        .unwrap();

        let prompt = ContextBuilder::new(dir.path()).build();
        assert!(!prompt.contains("{{CURRENT_DATE}}"));
        assert!(prompt.contains(&Utc::now().format("%Y-%m-%d").to_string()));
    }

    #[test]
    fn test_unknown_placeholder_left_intact() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("TOOLS.md"), "Use {{MYSTERY_VALUE}} wisely.").unwrap();

        let prompt = ContextBuilder::new(dir.path()).build();
        assert!(prompt.contains("{{MYSTERY_VALUE}}"));
    }

    #[test]
    fn test_user_profile_placeholders() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("USER.md"),
            "User: {{USER_NAME}} ({{USER_TIMEZONE}})",
        )
        .unwrap();

        // Unconfigured: both pass through.
        let prompt = ContextBuilder::new(dir.path()).build();
        assert!(prompt.contains("{{USER_NAME}}"));
        assert!(prompt.contains("{{USER_TIMEZONE}}"));

        // Configured: both substituted.
        let prompt = ContextBuilder::new(dir.path())
            .with_user_name("Alex")
            .with_timezone("Europe/Madrid")
            .build();
        assert!(prompt.contains("User: Alex (Europe/Madrid)"));
    }

    #[test]
    fn test_build_with_memory_file() {
        let dir = tempdir().unwrap();
        let memory_dir = dir.path().join("memory");
        std::fs::create_dir(&memory_dir).unwrap();
        std::fs::write(memory_dir.join("MEMORY.md"), "User prefers short replies.").unwrap();

        let prompt = ContextBuilder::new(dir.path())
            .with_memory_dir(&memory_dir)
            .build_with_memory(&[]);
        assert!(prompt.contains("Long-term Memory"));
        assert!(prompt.contains("User prefers short replies."));
    }

    #[test]
    fn test_build_with_memory_recaps_recent_messages() {
        let dir = tempdir().unwrap();
        let messages: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("turn {i}")))
            .collect();

        let prompt = ContextBuilder::new(dir.path()).build_with_memory(&messages);
        assert!(prompt.contains("Recent Conversation"));
        // Only the tail is recapped, oldest-first.
        assert!(!prompt.contains("turn 3"));
        assert!(prompt.contains("turn 4"));
        assert!(prompt.contains("turn 9"));
        let at4 = prompt.find("turn 4").unwrap();
        let at9 = prompt.find("turn 9").unwrap();
        assert!(at4 < at9);
    }

    #[test]
    fn test_build_for_session_header() {
        let dir = tempdir().unwrap();
        let messages = vec![Message::user("hello"), Message::assistant("hi")];
        let prompt = ContextBuilder::new(dir.path()).build_for_session("telegram_42", &messages);

        assert!(prompt.contains("Session ID: telegram_42"));
        assert!(prompt.contains("Messages so far: 2"));
    }
}
