//! Session host implementations.
//!
//! `TmuxSessionHost` drives the tmux CLI; `InMemorySessionHost` backs tests
//! and dry runs with scripted pane content.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::SessionHost;

/// Session host backed by the tmux CLI.
pub struct TmuxSessionHost {
    tmux_path: String,
}

impl TmuxSessionHost {
    pub fn new() -> Self {
        Self { tmux_path: "tmux".to_string() }
    }

    pub fn with_binary(tmux_path: impl Into<String>) -> Self {
        Self { tmux_path: tmux_path.into() }
    }

    async fn run(&self, args: &[&str]) -> DomainResult<std::process::Output> {
        Command::new(&self.tmux_path)
            .args(args)
            .output()
            .await
            .map_err(|e| DomainError::SessionError(format!("tmux spawn failed: {e}")))
    }

    async fn run_checked(&self, args: &[&str]) -> DomainResult<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::SessionError(format!(
                "tmux {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for TmuxSessionHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionHost for TmuxSessionHost {
    async fn create(&self, name: &str, cwd: &str, initial_command: &str) -> DomainResult<()> {
        self.run_checked(&["new-session", "-d", "-s", name, "-c", cwd, initial_command])
            .await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> DomainResult<bool> {
        let output = self.run(&["has-session", "-t", name]).await?;
        Ok(output.status.success())
    }

    async fn send(&self, name: &str, text: &str) -> DomainResult<()> {
        // -l keeps the text literal; Enter is sent as a separate key.
        self.run_checked(&["send-keys", "-t", name, "-l", text]).await?;
        self.run_checked(&["send-keys", "-t", name, "Enter"]).await?;
        Ok(())
    }

    async fn capture(&self, name: &str, lines: usize) -> DomainResult<String> {
        let start = format!("-{lines}");
        self.run_checked(&["capture-pane", "-p", "-t", name, "-S", &start])
            .await
    }

    async fn kill(&self, name: &str) -> DomainResult<()> {
        let output = self.run(&["kill-session", "-t", name]).await?;
        // Killing a missing session is a no-op; cleanup must be idempotent.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("can't find session") && !stderr.contains("no server running") {
                return Err(DomainError::SessionError(format!(
                    "tmux kill-session failed: {}",
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<String>> {
        let output = self
            .run(&["list-sessions", "-F", "#{session_name}"])
            .await?;
        if !output.status.success() {
            // No server running means no sessions.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// State of one in-memory session.
#[derive(Debug, Default, Clone)]
struct MemorySession {
    cwd: String,
    initial_command: String,
    pane: Vec<String>,
    sent: Vec<String>,
}

/// In-memory session host with scripted pane content.
#[derive(Default)]
pub struct InMemorySessionHost {
    sessions: Arc<Mutex<HashMap<String, MemorySession>>>,
}

impl InMemorySessionHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scripted pane content of a session.
    pub async fn set_pane(&self, name: &str, content: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(name) {
            session.pane = content.lines().map(str::to_string).collect();
        }
    }

    /// Append a line to the scripted pane content.
    pub async fn push_pane_line(&self, name: &str, line: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(name) {
            session.pane.push(line.to_string());
        }
    }

    /// Everything delivered to a session via `send`.
    pub async fn sent_messages(&self, name: &str) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(name).map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Working directory the session was created at.
    pub async fn session_cwd(&self, name: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(name).map(|s| s.cwd.clone())
    }

    /// Command the session was created with.
    pub async fn session_command(&self, name: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(name).map(|s| s.initial_command.clone())
    }
}

#[async_trait]
impl SessionHost for InMemorySessionHost {
    async fn create(&self, name: &str, cwd: &str, initial_command: &str) -> DomainResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(name) {
            return Err(DomainError::SessionError(format!("duplicate session: {name}")));
        }
        sessions.insert(
            name.to_string(),
            MemorySession {
                cwd: cwd.to_string(),
                initial_command: initial_command.to_string(),
                pane: Vec::new(),
                sent: Vec::new(),
            },
        );
        Ok(())
    }

    async fn has(&self, name: &str) -> DomainResult<bool> {
        Ok(self.sessions.lock().await.contains_key(name))
    }

    async fn send(&self, name: &str, text: &str) -> DomainResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| DomainError::SessionError(format!("no such session: {name}")))?;
        session.sent.push(text.to_string());
        Ok(())
    }

    async fn capture(&self, name: &str, lines: usize) -> DomainResult<String> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(name)
            .ok_or_else(|| DomainError::SessionError(format!("no such session: {name}")))?;
        let start = session.pane.len().saturating_sub(lines);
        Ok(session.pane[start..].join("\n"))
    }

    async fn kill(&self, name: &str) -> DomainResult<()> {
        self.sessions.lock().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<String>> {
        Ok(self.sessions.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_session_lifecycle() {
        let host = InMemorySessionHost::new();
        host.create("agent-1", "/tmp", "claude").await.unwrap();
        assert!(host.has("agent-1").await.unwrap());

        host.send("agent-1", "hello").await.unwrap();
        assert_eq!(host.sent_messages("agent-1").await, vec!["hello"]);

        host.kill("agent-1").await.unwrap();
        assert!(!host.has("agent-1").await.unwrap());
        // Idempotent cleanup
        host.kill("agent-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_capture_trailing_lines() {
        let host = InMemorySessionHost::new();
        host.create("agent-2", "/tmp", "claude").await.unwrap();
        host.set_pane("agent-2", "a\nb\nc\nd").await;

        let tail = host.capture("agent-2", 2).await.unwrap();
        assert_eq!(tail, "c\nd");

        let all = host.capture("agent-2", 100).await.unwrap();
        assert_eq!(all, "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let host = InMemorySessionHost::new();
        host.create("agent-3", "/tmp", "claude").await.unwrap();
        assert!(host.create("agent-3", "/tmp", "claude").await.is_err());
    }
}
