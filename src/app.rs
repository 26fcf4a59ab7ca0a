//! Application container.
//!
//! Everything is assembled here at startup and passed by handle; there are
//! no globals. `serve` runs the monitoring loop, the queue processor, and
//! the enrichment worker until shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::adapters::llm::OpenAiClient;
use crate::adapters::qdrant::QdrantIndex;
use crate::adapters::sqlite::{
    initialize_database, SqliteAgentRepository, SqliteMonitoringRepository, SqliteTaskRepository,
    SqliteTicketRepository, SqliteWorkflowRepository, SqliteWorktreeRepository,
};
use crate::adapters::tmux::TmuxSessionHost;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Config, Workflow};
use crate::domain::ports::{
    AgentRepository, LlmClient, MonitoringRepository, SessionHost, TaskRepository,
    TicketRepository, VectorIndex, WorkflowRepository, WorktreeRepository,
};
use crate::services::{
    AgentManager, Conductor, EmbeddingService, Guardian, MonitorLoop, QueueService,
    TaskBlockingService, TaskService, TaskSimilarityService, TicketService, ValidationService,
    WorktreeManager,
};

/// Capacity of the enrichment worker's inbox.
const ENRICHMENT_QUEUE_CAPACITY: usize = 64;

/// The assembled application.
pub struct App {
    pub config: Config,
    pub task_repo: Arc<dyn TaskRepository>,
    pub agent_repo: Arc<dyn AgentRepository>,
    pub ticket_repo: Arc<dyn TicketRepository>,
    pub workflow_repo: Arc<dyn WorkflowRepository>,
    pub worktree_repo: Arc<dyn WorktreeRepository>,
    pub monitoring_repo: Arc<dyn MonitoringRepository>,
    pub queue: Arc<QueueService>,
    pub blocking: Arc<TaskBlockingService>,
    pub agent_manager: Arc<AgentManager>,
    pub worktree_manager: Arc<WorktreeManager>,
    pub ticket_service: Arc<TicketService>,
    pub validation: Arc<ValidationService>,
    pub task_service: Arc<TaskService>,
    pub monitor: Arc<MonitorLoop>,
    enrichment_tx: mpsc::Sender<Uuid>,
    enrichment_rx: std::sync::Mutex<Option<mpsc::Receiver<Uuid>>>,
}

impl App {
    /// Build against the configured database, tmux, LLM provider, and
    /// (optionally) Qdrant.
    pub async fn build(config: Config) -> Result<Self> {
        let database_url = format!("sqlite:{}", config.database.path);
        let pool = initialize_database(
            &database_url,
            Some(crate::adapters::sqlite::PoolConfig {
                max_connections: config.database.max_connections,
            }),
        )
        .await
        .context("Failed to initialize database")?;

        let session_host: Arc<dyn SessionHost> = Arc::new(TmuxSessionHost::new());
        let llm: Arc<dyn LlmClient> = Arc::new(
            OpenAiClient::new(config.llm.clone()).context("Failed to build LLM client")?,
        );
        let vector_index: Option<Arc<dyn VectorIndex>> = match &config.qdrant.url {
            Some(url) => Some(Arc::new(
                QdrantIndex::new(url.clone(), config.qdrant.collection.clone())
                    .context("Failed to build vector index")?,
            )),
            None => None,
        };

        Self::assemble(config, pool, session_host, llm, vector_index)
    }

    /// Assemble with injected capability adapters (used by tests).
    pub fn assemble(
        config: Config,
        pool: sqlx::SqlitePool,
        session_host: Arc<dyn SessionHost>,
        llm: Arc<dyn LlmClient>,
        vector_index: Option<Arc<dyn VectorIndex>>,
    ) -> Result<Self> {
        let task_repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let agent_repo: Arc<dyn AgentRepository> =
            Arc::new(SqliteAgentRepository::new(pool.clone()));
        let ticket_repo: Arc<dyn TicketRepository> =
            Arc::new(SqliteTicketRepository::new(pool.clone()));
        let workflow_repo: Arc<dyn WorkflowRepository> =
            Arc::new(SqliteWorkflowRepository::new(pool.clone()));
        let worktree_repo: Arc<dyn WorktreeRepository> =
            Arc::new(SqliteWorktreeRepository::new(pool.clone()));
        let monitoring_repo: Arc<dyn MonitoringRepository> =
            Arc::new(SqliteMonitoringRepository::new(pool));

        let blocking = Arc::new(TaskBlockingService::new(task_repo.clone(), ticket_repo.clone()));
        let queue = Arc::new(QueueService::new(
            task_repo.clone(),
            agent_repo.clone(),
            blocking.clone(),
            config.max_concurrent_agents,
        ));

        let embeddings = Arc::new(EmbeddingService::new(llm.clone()));
        let similarity = Arc::new(TaskSimilarityService::new(
            task_repo.clone(),
            config.dedup.clone(),
        ));

        let worktree_manager = Arc::new(WorktreeManager::new(
            worktree_repo.clone(),
            config.main_repo_path.clone(),
            config.worktrees_path.clone(),
        ));
        let agent_manager = Arc::new(AgentManager::new(
            agent_repo.clone(),
            session_host,
            worktree_manager.clone(),
            config.agent.clone(),
        ));

        let main_repo = config.main_repo_path.to_string_lossy().into_owned();
        let ticket_service = Arc::new(TicketService::new(
            ticket_repo.clone(),
            workflow_repo.clone(),
            blocking.clone(),
            embeddings.clone(),
            vector_index.clone(),
            main_repo.clone(),
        ));
        let validation = Arc::new(ValidationService::new(
            task_repo.clone(),
            agent_repo.clone(),
            workflow_repo.clone(),
            agent_manager.clone(),
            worktree_manager.clone(),
            ticket_service.clone(),
            main_repo,
        ));

        let task_service = Arc::new(TaskService::new(
            task_repo.clone(),
            agent_repo.clone(),
            workflow_repo.clone(),
            ticket_repo.clone(),
            queue.clone(),
            blocking.clone(),
            similarity,
            embeddings,
            agent_manager.clone(),
            worktree_manager.clone(),
            validation.clone(),
            ticket_service.clone(),
            llm.clone(),
            vector_index,
            config.clone(),
        ));

        let guardian = Arc::new(Guardian::new(
            agent_repo.clone(),
            task_repo.clone(),
            workflow_repo.clone(),
            monitoring_repo.clone(),
            agent_manager.clone(),
            llm.clone(),
            config.monitoring.clone(),
        ));
        let conductor = Arc::new(Conductor::new(
            agent_repo.clone(),
            monitoring_repo.clone(),
            agent_manager.clone(),
            llm,
        ));
        let monitor = Arc::new(MonitorLoop::new(
            agent_repo.clone(),
            task_repo.clone(),
            workflow_repo.clone(),
            monitoring_repo.clone(),
            agent_manager.clone(),
            guardian,
            conductor,
            task_service.clone(),
            config.clone(),
        ));

        let (enrichment_tx, enrichment_rx) = mpsc::channel(ENRICHMENT_QUEUE_CAPACITY);

        Ok(Self {
            config,
            task_repo,
            agent_repo,
            ticket_repo,
            workflow_repo,
            worktree_repo,
            monitoring_repo,
            queue,
            blocking,
            agent_manager,
            worktree_manager,
            ticket_service,
            validation,
            task_service,
            monitor,
            enrichment_tx,
            enrichment_rx: std::sync::Mutex::new(Some(enrichment_rx)),
        })
    }

    /// Hand a newly created task to the enrichment worker.
    pub async fn submit_for_enrichment(&self, task_id: Uuid) -> DomainResult<()> {
        self.enrichment_tx
            .send(task_id)
            .await
            .map_err(|_| DomainError::InvalidArgument("Enrichment worker stopped".to_string()))
    }

    /// Run the daemon: monitoring loop, queue processor, enrichment worker.
    /// Returns once the shutdown signal flips and in-flight work drains.
    pub async fn serve(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let monitor = self.monitor.clone();
        let monitor_shutdown = shutdown.clone();
        let monitor_handle =
            tokio::spawn(async move { monitor.run(monitor_shutdown).await });

        // Queue processor: a ~60s heartbeat guaranteeing forward progress
        // even when no completion event fires. Reconciles blocking first.
        let app = self.clone();
        let mut processor_shutdown = shutdown.clone();
        let processor_handle = tokio::spawn(async move {
            let period = std::time::Duration::from_secs(
                app.config.queue.processor_interval_seconds.max(1),
            );
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = app.blocking.sync().await {
                            tracing::error!(error = %e, "Blocking sync failed");
                        }
                        if let Err(e) = app.task_service.process_queue().await {
                            tracing::error!(error = %e, "Queue processing failed");
                        }
                    }
                    _ = processor_shutdown.changed() => {
                        if *processor_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        // Enrichment worker: consumes newly created task ids and runs the
        // creation pipeline; progress is persisted per step, so a restart
        // re-drives unfinished tasks through the queue processor.
        let app = self.clone();
        let mut worker_shutdown = shutdown;
        let mut rx = self
            .enrichment_rx
            .lock()
            .map_err(|_| anyhow::anyhow!("enrichment receiver lock poisoned"))?
            .take()
            .context("serve called twice")?;
        let worker_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(task_id) => {
                                if let Err(e) = app.task_service.process_new_task(task_id).await {
                                    tracing::error!(%task_id, error = %e, "Task pipeline failed");
                                }
                            }
                            None => break,
                        }
                    }
                    _ = worker_shutdown.changed() => {
                        if *worker_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let (monitor_result, processor_result, worker_result) =
            tokio::join!(monitor_handle, processor_handle, worker_handle);
        monitor_result.context("monitor loop panicked")?;
        processor_result.context("queue processor panicked")?;
        worker_result.context("enrichment worker panicked")?;
        Ok(())
    }

    /// The unique active workflow.
    ///
    /// Explicit errors when zero or multiple workflows are active; callers
    /// must select one rather than rely on silent auto-selection.
    pub async fn single_active_workflow(&self) -> DomainResult<Workflow> {
        let mut active = self.workflow_repo.list_active_workflows().await?;
        match active.len() {
            0 => Err(DomainError::NoActiveWorkflow),
            1 => Ok(active.remove(0)),
            n => Err(DomainError::MultipleActiveWorkflows(n)),
        }
    }
}
