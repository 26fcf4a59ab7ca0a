//! Phase-scoped deduplication: near-identical tasks in the same phase
//! deduplicate; the same text in another phase does not.

mod common;

use hephaestus::domain::models::{Phase, TaskPriority, TaskStatus, Workflow};
use hephaestus::domain::ports::{AgentRepository, EnrichedTask, TaskRepository, WorkflowRepository};
use hephaestus::services::{NewTask, PipelineOutcome};
use uuid::Uuid;

async fn workflow_with_phases(fx: &common::TestApp) -> (Uuid, Uuid, Uuid) {
    let workflow = Workflow::new("wf", None);
    fx.app.workflow_repo.create_workflow(&workflow).await.unwrap();
    let p1 = Phase::new(workflow.id, 1, "P1", "first", vec![]);
    let p2 = Phase::new(workflow.id, 2, "P2", "second", vec![]);
    fx.app.workflow_repo.create_phase(&p1).await.unwrap();
    fx.app.workflow_repo.create_phase(&p2).await.unwrap();
    (workflow.id, p1.id, p2.id)
}

fn task_in_phase(description: &str, phase_id: Uuid) -> NewTask {
    NewTask {
        description: description.to_string(),
        done_definition: "jwt login works".to_string(),
        priority: TaskPriority::Medium,
        ticket_id: None,
        phase_id: Some(phase_id),
        parent_task_id: None,
        created_by: Some("main-session-cli".to_string()),
        validation_enabled: Some(false),
    }
}

fn enriched(text: &str) -> EnrichedTask {
    EnrichedTask {
        enriched_description: text.to_string(),
        estimated_complexity: 3,
    }
}

#[tokio::test]
async fn duplicate_detected_within_phase_only() {
    // Keep everything queued so no agents are involved.
    let fx = common::build_app(|c| c.max_concurrent_agents = 0).await;
    let (_wf, p1, p2) = workflow_with_phases(&fx).await;

    // Script identical enrichment so the embeddings match exactly.
    fx.llm.push_enrichment(enriched("Implement JWT login for the API"));
    fx.llm.push_enrichment(enriched("Implement JWT login for the API"));
    fx.llm.push_enrichment(enriched("Implement JWT login for the API"));

    let (task_a, outcome) = fx
        .app
        .task_service
        .create_and_process(task_in_phase("implement JWT login", p1))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Queued);

    // B: same phase, same enrichment → duplicated, no agent ever runs it.
    let (task_b, outcome) = fx
        .app
        .task_service
        .create_and_process(task_in_phase("implement JWT login with bearer token", p1))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Duplicated);

    let task_b = fx.app.task_repo.get(task_b.id).await.unwrap().unwrap();
    assert_eq!(task_b.status, TaskStatus::Duplicated);
    assert_eq!(task_b.duplicate_of_task_id, Some(task_a.id));
    assert!(task_b.similarity_score.unwrap() >= 0.85);
    assert!(task_b.assigned_agent_id.is_none());
    assert_eq!(fx.app.agent_repo.count_active().await.unwrap(), 0);

    // C: identical text in another phase → never a duplicate.
    let (task_c, outcome) = fx
        .app
        .task_service
        .create_and_process(task_in_phase("implement JWT login", p2))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Queued);
    let task_c = fx.app.task_repo.get(task_c.id).await.unwrap().unwrap();
    assert!(task_c.duplicate_of_task_id.is_none());

    // The duplicate points at a task in the same phase (invariant 6).
    let original = fx.app.task_repo.get(task_a.id).await.unwrap().unwrap();
    assert_eq!(original.phase_id, task_b.phase_id);
}

#[tokio::test]
async fn embedding_failure_degrades_to_not_duplicate() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 0).await;
    let (_wf, p1, _p2) = workflow_with_phases(&fx).await;

    fx.llm.push_enrichment(enriched("Implement JWT login for the API"));
    fx.app
        .task_service
        .create_and_process(task_in_phase("implement JWT login", p1))
        .await
        .unwrap();

    // Embeddings now fail: creation continues and the task queues normally.
    fx.llm.set_fail_embeddings(true);
    fx.llm.push_enrichment(enriched("Implement JWT login for the API"));
    let (task, outcome) = fx
        .app
        .task_service
        .create_and_process(task_in_phase("implement JWT login again", p1))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Queued);
    let task = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.duplicate_of_task_id.is_none());
}

#[tokio::test]
async fn dedup_disabled_skips_checks() {
    let fx = common::build_app(|c| {
        c.max_concurrent_agents = 0;
        c.dedup.enabled = false;
    })
    .await;
    let (_wf, p1, _p2) = workflow_with_phases(&fx).await;

    fx.llm.push_enrichment(enriched("Same text"));
    fx.llm.push_enrichment(enriched("Same text"));

    fx.app
        .task_service
        .create_and_process(task_in_phase("same", p1))
        .await
        .unwrap();
    let (_task, outcome) = fx
        .app
        .task_service
        .create_and_process(task_in_phase("same", p1))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Queued);
}
