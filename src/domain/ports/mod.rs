//! Port interfaces between the domain and the adapters.

pub mod agent_repository;
pub mod llm_client;
pub mod monitoring_repository;
pub mod session_host;
pub mod task_repository;
pub mod ticket_repository;
pub mod vector_index;
pub mod workflow_repository;
pub mod worktree_repository;

pub use agent_repository::AgentRepository;
pub use llm_client::{
    CoherenceAnalysis, CoherenceRequest, CoordinationNeed, DuplicateWork, EnrichTaskRequest,
    EnrichedTask, LlmClient, TerminationRecommendation, TrajectoryAnalysis, TrajectoryRequest,
};
pub use monitoring_repository::MonitoringRepository;
pub use session_host::SessionHost;
pub use task_repository::{TaskFilter, TaskRepository};
pub use ticket_repository::{TicketRepository, TicketSearchHit};
pub use vector_index::{ScoredPoint, VectorIndex};
pub use workflow_repository::WorkflowRepository;
pub use worktree_repository::WorktreeRepository;
