//! Duplicate and related-task detection by embedding similarity.
//!
//! Comparison is strictly phase-scoped: tasks in different phases are never
//! duplicates, even at similarity 1.0. Embedding failures degrade to
//! "not a duplicate" and never block task creation.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::DedupConfig;
use crate::domain::models::RelatedTask;
use crate::domain::ports::TaskRepository;
use crate::services::embedding_service::batch_similarities;

/// At most this many related tasks are stored per task.
const MAX_RELATED_TASKS: usize = 10;

/// Outcome of a duplicate check for a new task.
#[derive(Debug, Clone, Default)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub duplicate_of: Option<Uuid>,
    pub duplicate_description: Option<String>,
    pub related_tasks: Vec<RelatedTask>,
    pub max_similarity: f32,
}

/// Detects duplicate and related tasks within a phase.
pub struct TaskSimilarityService {
    task_repo: Arc<dyn TaskRepository>,
    config: DedupConfig,
}

impl TaskSimilarityService {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: DedupConfig) -> Self {
        tracing::info!(
            duplicate = config.similarity_threshold,
            related = config.related_threshold,
            "TaskSimilarityService initialized"
        );
        Self { task_repo, config }
    }

    /// Compare a new task's embedding against prior tasks in the same phase.
    ///
    /// Prior tasks with status failed/duplicated or without embeddings are
    /// ignored. Errors degrade to an empty result.
    pub async fn check_for_duplicates(
        &self,
        task_embedding: &[f32],
        phase_id: Option<Uuid>,
    ) -> DomainResult<DuplicateCheck> {
        let existing = match self.task_repo.list_embedded_in_phase(phase_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "Error checking for duplicates; treating as none");
                return Ok(DuplicateCheck::default());
            }
        };

        if existing.is_empty() {
            return Ok(DuplicateCheck::default());
        }

        tracing::debug!(candidates = existing.len(), ?phase_id, "Comparing against existing tasks");

        let embeddings: Vec<Vec<f32>> = existing
            .iter()
            .filter_map(|t| t.embedding.clone())
            .collect();
        let similarities = batch_similarities(task_embedding, &embeddings);

        let mut duplicate: Option<&crate::domain::models::Task> = None;
        let mut max_similarity = 0.0f32;
        let mut related: Vec<(Uuid, f32)> = Vec::new();

        for (task, similarity) in existing.iter().zip(similarities.iter().copied()) {
            if similarity > max_similarity {
                max_similarity = similarity;
                if similarity >= self.config.similarity_threshold {
                    duplicate = Some(task);
                }
            }
            if similarity >= self.config.related_threshold
                && similarity < self.config.similarity_threshold
            {
                related.push((task.id, similarity));
            }
        }

        related.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        related.truncate(MAX_RELATED_TASKS);

        let check = DuplicateCheck {
            is_duplicate: duplicate.is_some(),
            duplicate_of: duplicate.map(|t| t.id),
            duplicate_description: duplicate.map(|t| t.description().to_string()),
            related_tasks: related
                .into_iter()
                .map(|(id, similarity)| RelatedTask { id, similarity })
                .collect(),
            max_similarity,
        };

        if check.is_duplicate {
            tracing::info!(
                duplicate_of = ?check.duplicate_of,
                similarity = max_similarity,
                ?phase_id,
                "Found duplicate task"
            );
        } else if !check.related_tasks.is_empty() {
            tracing::info!(count = check.related_tasks.len(), "Found related tasks");
        }

        Ok(check)
    }

    /// Persist embedding and relationship info onto a task.
    pub async fn store_task_embedding(
        &self,
        task_id: Uuid,
        embedding: Vec<f32>,
        related_tasks: Vec<RelatedTask>,
        duplicate_of: Option<Uuid>,
        similarity_score: Option<f32>,
    ) -> DomainResult<()> {
        let Some(mut task) = self.task_repo.get(task_id).await? else {
            tracing::warn!(%task_id, "Task not found when storing embedding");
            return Ok(());
        };

        task.embedding = Some(embedding);
        task.related_tasks = related_tasks;
        if let Some(original) = duplicate_of {
            task.duplicate_of_task_id = Some(original);
            task.similarity_score = similarity_score;
        }
        task.updated_at = chrono::Utc::now();
        self.task_repo.update(&task).await?;
        tracing::debug!(%task_id, "Stored task embedding");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteTaskRepository};
    use crate::domain::models::{Task, TaskStatus};

    async fn setup() -> (TaskSimilarityService, Arc<SqliteTaskRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTaskRepository::new(pool));
        let service = TaskSimilarityService::new(repo.clone(), DedupConfig::default());
        (service, repo)
    }

    async fn embedded_task(
        repo: &SqliteTaskRepository,
        text: &str,
        embedding: Vec<f32>,
        phase_id: Option<Uuid>,
    ) -> Task {
        let mut task = Task::new(text, "d");
        task.enriched_description = Some(text.to_string());
        task.embedding = Some(embedding);
        task.phase_id = phase_id;
        repo.create(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_detects_duplicate_in_same_phase() {
        let (service, repo) = setup().await;
        let phase = Some(Uuid::new_v4());
        let existing = embedded_task(&repo, "implement jwt login", vec![1.0, 0.0, 0.0], phase).await;

        let check = service
            .check_for_duplicates(&[0.99, 0.05, 0.0], phase)
            .await
            .unwrap();
        assert!(check.is_duplicate);
        assert_eq!(check.duplicate_of, Some(existing.id));
        assert!(check.max_similarity > 0.85);
    }

    #[tokio::test]
    async fn test_phase_isolation_is_mandatory() {
        let (service, repo) = setup().await;
        let phase1 = Some(Uuid::new_v4());
        let phase2 = Some(Uuid::new_v4());
        embedded_task(&repo, "implement jwt login", vec![1.0, 0.0, 0.0], phase1).await;

        // Identical embedding, different phase: never a duplicate.
        let check = service
            .check_for_duplicates(&[1.0, 0.0, 0.0], phase2)
            .await
            .unwrap();
        assert!(!check.is_duplicate);
        assert_eq!(check.max_similarity, 0.0);
    }

    #[tokio::test]
    async fn test_related_band_collects_but_does_not_duplicate() {
        let (service, repo) = setup().await;
        let phase = Some(Uuid::new_v4());
        // cos = 0.8 against query [1, 0]
        let existing = embedded_task(&repo, "related work", vec![0.8, 0.6], phase).await;

        let check = service.check_for_duplicates(&[1.0, 0.0], phase).await.unwrap();
        assert!(!check.is_duplicate);
        assert_eq!(check.related_tasks.len(), 1);
        assert_eq!(check.related_tasks[0].id, existing.id);
        assert!((check.related_tasks[0].similarity - 0.8).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_failed_and_duplicated_tasks_ignored() {
        let (service, repo) = setup().await;
        let phase = Some(Uuid::new_v4());

        let mut failed = Task::new("failed one", "d");
        failed.embedding = Some(vec![1.0, 0.0]);
        failed.phase_id = phase;
        failed.force_status(TaskStatus::Failed, "test setup");
        repo.create(&failed).await.unwrap();

        let check = service.check_for_duplicates(&[1.0, 0.0], phase).await.unwrap();
        assert!(!check.is_duplicate);
    }

    #[tokio::test]
    async fn test_related_capped_at_ten() {
        let (service, repo) = setup().await;
        let phase = Some(Uuid::new_v4());
        for i in 0..12 {
            // All in the related band against [1, 0].
            embedded_task(&repo, &format!("related {i}"), vec![0.75, 0.66], phase).await;
        }

        let check = service.check_for_duplicates(&[1.0, 0.0], phase).await.unwrap();
        assert!(!check.is_duplicate);
        assert_eq!(check.related_tasks.len(), 10);
    }

    #[tokio::test]
    async fn test_store_marks_duplicate() {
        let (service, repo) = setup().await;
        let original = embedded_task(&repo, "original", vec![1.0, 0.0], None).await;
        let dup = Task::new("dup", "d");
        repo.create(&dup).await.unwrap();

        service
            .store_task_embedding(dup.id, vec![1.0, 0.0], vec![], Some(original.id), Some(0.97))
            .await
            .unwrap();

        let stored = repo.get(dup.id).await.unwrap().unwrap();
        assert_eq!(stored.duplicate_of_task_id, Some(original.id));
        assert_eq!(stored.similarity_score, Some(0.97));
    }
}
