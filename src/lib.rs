//! Hephaestus - orchestrator for fleets of long-running AI coding agents.
//!
//! A controller process spawns each agent as an interactive CLI inside an
//! isolated tmux session working in its own git worktree, dispatches work to
//! it, observes its on-screen output, steers it with injected messages, and
//! merges its results back when validation passes.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use app::App;
pub use domain::{DomainError, DomainResult};
