//! Service layer: the orchestrator core.

pub mod agent_manager;
pub mod blocking_service;
pub mod conductor;
pub mod embedding_service;
pub mod guardian;
pub mod monitor;
pub mod queue_service;
pub mod similarity_service;
pub mod task_service;
pub mod ticket_service;
pub mod trajectory_context;
pub mod validation_service;
pub mod worktree_manager;

pub use agent_manager::{AgentManager, SendOutcome, SpawnRequest};
pub use blocking_service::{BlockingInfo, BlockingSyncReport, TaskBlockingService};
pub use conductor::{Conductor, ConductorDecision, ConductorOutcome};
pub use embedding_service::{batch_similarities, cosine_similarity, EmbeddingService};
pub use guardian::{Guardian, GuardianSummary};
pub use monitor::{MonitorLoop, TickReport};
pub use queue_service::{queue_ordering, Admission, QueueService, QueueStatus};
pub use similarity_service::{DuplicateCheck, TaskSimilarityService};
pub use task_service::{NewTask, PipelineOutcome, TaskService};
pub use ticket_service::{NewTicket, ResolveOutcome, TicketService};
pub use trajectory_context::{AccumulatedContext, TrajectoryContext};
pub use validation_service::{ValidationService, VerdictOutcome};
pub use worktree_manager::WorktreeManager;
