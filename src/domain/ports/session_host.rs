//! Terminal-multiplexer capability port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Capability interface over a terminal multiplexer.
///
/// Session names are unique; cleanup is idempotent (killing a missing
/// session is not an error).
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Create a detached session running `initial_command` at `cwd`.
    async fn create(&self, name: &str, cwd: &str, initial_command: &str) -> DomainResult<()>;

    /// Whether a session with this name exists.
    async fn has(&self, name: &str) -> DomainResult<bool>;

    /// Deliver text verbatim followed by a newline.
    async fn send(&self, name: &str, text: &str) -> DomainResult<()>;

    /// Capture the trailing `lines` lines of the session's pane.
    async fn capture(&self, name: &str, lines: usize) -> DomainResult<String>;

    /// Kill the session. Succeeds if the session is already gone.
    async fn kill(&self, name: &str) -> DomainResult<()>;

    /// Names of all live sessions.
    async fn list(&self) -> DomainResult<Vec<String>>;
}
