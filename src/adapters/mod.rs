//! Adapters binding the domain ports to concrete infrastructure.

pub mod llm;
pub mod qdrant;
pub mod sqlite;
pub mod tmux;

pub use llm::{MockLlmClient, OpenAiClient};
pub use qdrant::QdrantIndex;
pub use tmux::{InMemorySessionHost, TmuxSessionHost};
