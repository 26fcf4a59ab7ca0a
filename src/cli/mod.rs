//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Hephaestus: orchestrator for fleets of long-running AI coding agents.
#[derive(Parser, Debug)]
#[command(name = "hephaestus", version, about)]
pub struct Cli {
    /// Path to a config file (defaults to .hephaestus/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator daemon (monitor loop + queue processor)
    Serve,

    /// Task operations
    #[command(subcommand)]
    Task(TaskCommands),

    /// Queue operations
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Ticket operations
    #[command(subcommand)]
    Ticket(TicketCommands),

    /// Workflow operations
    #[command(subcommand)]
    Workflow(WorkflowCommands),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task and run it through the pipeline
    Create {
        /// What to do
        #[arg(long)]
        description: String,
        /// Definition of done
        #[arg(long)]
        done: String,
        /// Priority: low, medium, high
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Associated ticket id
        #[arg(long)]
        ticket: Option<Uuid>,
        /// Phase id within the active workflow
        #[arg(long)]
        phase: Option<Uuid>,
        /// Require a validator verdict before completion
        #[arg(long)]
        validate: bool,
    },
    /// List tasks, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task
    Show { id: Uuid },
    /// Boost a queued task and start it immediately (bypasses the agent cap)
    Bump { id: Uuid },
    /// Cancel a queued task
    Cancel { id: Uuid },
    /// Restart a done or failed task
    Restart { id: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Show queue and capacity status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum TicketCommands {
    /// Create a ticket on the workflow board
    Create {
        #[arg(long)]
        workflow: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "task")]
        ticket_type: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Tickets that must resolve first
        #[arg(long)]
        blocked_by: Vec<Uuid>,
        #[arg(long)]
        tags: Vec<String>,
    },
    /// List tickets in a workflow
    List {
        #[arg(long)]
        workflow: Uuid,
        #[arg(long)]
        status: Option<String>,
    },
    /// Move a ticket to another board column
    Move {
        id: Uuid,
        #[arg(long)]
        status: String,
        #[arg(long, default_value = "moved via CLI")]
        comment: String,
    },
    /// Comment on a ticket
    Comment {
        id: Uuid,
        #[arg(long)]
        text: String,
    },
    /// Resolve a ticket and cascade-unblock dependents
    Resolve {
        id: Uuid,
        #[arg(long, default_value = "resolved via CLI")]
        comment: String,
        #[arg(long)]
        commit: Option<String>,
    },
    /// Search tickets (semantic with keyword fallback)
    Search {
        #[arg(long)]
        workflow: Uuid,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// Load a workflow definition (YAML) and activate it
    Load { path: String },
    /// Show workflows and phase progress
    Status,
}
