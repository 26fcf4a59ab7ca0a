//! Domain models for the Hephaestus orchestrator.

pub mod agent;
pub mod config;
pub mod monitoring;
pub mod task;
pub mod ticket;
pub mod workflow;
pub mod worktree;

pub use agent::{Agent, AgentLog, AgentStatus, AgentType, LogKind};
pub use config::Config;
pub use monitoring::{
    ConductorAnalysisRecord, DetectedDuplicateRecord, DiagnosticRun, DiagnosticStatus,
    GuardianAnalysisRecord, SteeringRecord, SteeringType,
};
pub use task::{RelatedTask, Task, TaskPriority, TaskStatus, MONITOR_AGENT};
pub use ticket::{
    BoardConfig, CommentKind, Ticket, TicketCommitLink, TicketComment, TicketHistoryEntry,
    TicketPriority,
};
pub use workflow::{
    Phase, PhaseDefinition, PhaseStatus, PhaseValidation, ResultStatus, ValidationReview,
    Workflow, WorkflowDefinition, WorkflowResult, WorkflowStatus,
};
pub use worktree::{
    ConflictResolution, MergeStatus, ResolutionChoice, Worktree, WorktreeCommit,
    WorktreeCommitKind,
};
