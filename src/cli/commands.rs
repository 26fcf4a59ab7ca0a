//! CLI command handlers.

use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::App;
use crate::cli::{QueueCommands, TaskCommands, TicketCommands, WorkflowCommands};
use crate::domain::models::{
    BoardConfig, Phase, TaskPriority, TaskStatus, TicketPriority, Workflow, WorkflowDefinition,
};
use crate::domain::ports::{TaskFilter, TaskRepository, TicketRepository, WorkflowRepository};
use crate::services::{NewTask, NewTicket, PipelineOutcome};

/// Operator identity stamped on CLI-originated changes.
const CLI_AGENT: &str = "main-session-cli";

fn short(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Char-safe clipping for table cells.
fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub async fn handle_task(app: &Arc<App>, command: TaskCommands) -> Result<()> {
    match command {
        TaskCommands::Create { description, done, priority, ticket, phase, validate } => {
            let priority = TaskPriority::from_str(&priority)
                .with_context(|| format!("invalid priority: {priority}"))?;
            let (task, outcome) = app
                .task_service
                .create_and_process(NewTask {
                    description,
                    done_definition: done,
                    priority,
                    ticket_id: ticket,
                    phase_id: phase,
                    parent_task_id: None,
                    created_by: Some(CLI_AGENT.to_string()),
                    validation_enabled: validate.then_some(true),
                })
                .await?;

            let outcome_text = match outcome {
                PipelineOutcome::Spawned => style("agent spawned").green().to_string(),
                PipelineOutcome::Queued => style("queued").yellow().to_string(),
                PipelineOutcome::Blocked => style("blocked by ticket").red().to_string(),
                PipelineOutcome::Duplicated => style("duplicate").red().to_string(),
                PipelineOutcome::Failed => style("failed").red().to_string(),
            };
            println!("Task {} created: {outcome_text}", short(task.id));
            if let Some(dup) = app
                .task_repo
                .get(task.id)
                .await?
                .and_then(|t| t.duplicate_of_task_id)
            {
                println!("  duplicate of {}", short(dup));
            }
        }
        TaskCommands::List { status } => {
            let filter = match status {
                Some(s) => TaskFilter {
                    status: Some(
                        TaskStatus::from_str(&s).with_context(|| format!("invalid status: {s}"))?,
                    ),
                    ..Default::default()
                },
                None => TaskFilter::default(),
            };
            let tasks = app.task_repo.list(filter).await?;

            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec![
                "id", "status", "priority", "queue", "description",
            ]);
            for task in tasks {
                let description = clip(task.description(), 60);
                table.add_row(vec![
                    Cell::new(short(task.id)),
                    Cell::new(task.status.as_str()),
                    Cell::new(task.priority.as_str()),
                    Cell::new(
                        task.queue_position
                            .map(|p| p.to_string())
                            .unwrap_or_default(),
                    ),
                    Cell::new(description),
                ]);
            }
            println!("{table}");
        }
        TaskCommands::Show { id } => {
            let task = app
                .task_repo
                .get(id)
                .await?
                .with_context(|| format!("task not found: {id}"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskCommands::Bump { id } => {
            let agent = app.task_service.bump_priority(id).await?;
            println!(
                "Task {} started immediately on agent {} (bypassing agent limit)",
                short(id),
                short(agent.id)
            );
        }
        TaskCommands::Cancel { id } => {
            app.task_service.cancel_queued(id).await?;
            println!("Task {} cancelled and removed from queue", short(id));
        }
        TaskCommands::Restart { id } => {
            let outcome = app.task_service.restart(id).await?;
            println!("Task {} restarted: {outcome:?}", short(id));
        }
    }
    Ok(())
}

pub async fn handle_queue(app: &Arc<App>, command: QueueCommands) -> Result<()> {
    match command {
        QueueCommands::Status => {
            let status = app.queue.status().await?;
            println!(
                "Agents: {}/{} active ({} slot(s) free){}",
                status.active_agents,
                status.max_concurrent_agents,
                status.slots_available,
                if status.at_capacity {
                    format!(" {}", style("AT CAPACITY").red())
                } else {
                    String::new()
                }
            );

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["pos", "id", "priority", "boosted", "queued at", "description"]);
            for entry in status.queued_tasks {
                let description = clip(&entry.description, 50);
                table.add_row(vec![
                    Cell::new(entry.queue_position.map(|p| p.to_string()).unwrap_or_default()),
                    Cell::new(short(entry.task_id)),
                    Cell::new(&entry.priority),
                    Cell::new(if entry.priority_boosted { "yes" } else { "" }),
                    Cell::new(
                        entry
                            .queued_at
                            .map(|t| t.format("%H:%M:%S").to_string())
                            .unwrap_or_default(),
                    ),
                    Cell::new(description),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

pub async fn handle_ticket(app: &Arc<App>, command: TicketCommands) -> Result<()> {
    match command {
        TicketCommands::Create {
            workflow,
            title,
            description,
            ticket_type,
            priority,
            blocked_by,
            tags,
        } => {
            let priority = TicketPriority::from_str(&priority)
                .with_context(|| format!("invalid priority: {priority}"))?;
            let ticket = app
                .ticket_service
                .create(NewTicket {
                    workflow_id: workflow,
                    agent_id: CLI_AGENT.to_string(),
                    title,
                    description,
                    ticket_type,
                    priority,
                    initial_status: None,
                    parent_ticket_id: None,
                    blocked_by_ticket_ids: blocked_by,
                    tags,
                })
                .await?;
            println!("Ticket {} created in '{}'", short(ticket.id), ticket.status);
        }
        TicketCommands::List { workflow, status } => {
            let tickets = app
                .ticket_service
                .list_by_workflow(workflow, status.as_deref())
                .await?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["id", "status", "type", "priority", "blocked", "title"]);
            for ticket in tickets {
                table.add_row(vec![
                    Cell::new(short(ticket.id)),
                    Cell::new(&ticket.status),
                    Cell::new(&ticket.ticket_type),
                    Cell::new(ticket.priority.as_str()),
                    Cell::new(if ticket.is_blocked() {
                        format!("{} blocker(s)", ticket.blocked_by_ticket_ids.len())
                    } else {
                        String::new()
                    }),
                    Cell::new(&ticket.title),
                ]);
            }
            println!("{table}");
        }
        TicketCommands::Move { id, status, comment } => {
            let ticket = app
                .ticket_service
                .change_status(id, CLI_AGENT, &status, &comment, None)
                .await?;
            println!("Ticket {} moved to '{}'", short(id), ticket.status);
        }
        TicketCommands::Comment { id, text } => {
            app.ticket_service
                .add_comment(id, CLI_AGENT, &text, crate::domain::models::CommentKind::General)
                .await?;
            println!("Comment added to {}", short(id));
        }
        TicketCommands::Resolve { id, comment, commit } => {
            let outcome = app
                .ticket_service
                .resolve(id, CLI_AGENT, &comment, commit.as_deref())
                .await?;
            println!(
                "Ticket {} resolved; unblocked {} ticket(s) and {} task(s)",
                short(id),
                outcome.unblocked_tickets.len(),
                outcome.unblocked_tasks.len()
            );
        }
        TicketCommands::Search { workflow, query, limit } => {
            let hits = app.ticket_service.search(workflow, &query, limit).await?;
            for hit in hits {
                println!("{}  {}  [{}]", short(hit.ticket.id), hit.ticket.title, hit.ticket.status);
            }
        }
    }
    Ok(())
}

pub async fn handle_workflow(app: &Arc<App>, command: WorkflowCommands) -> Result<()> {
    match command {
        WorkflowCommands::Load { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("cannot read {path}"))?;
            let definition: WorkflowDefinition =
                serde_yaml::from_str(&text).context("invalid workflow definition")?;
            if definition.phases.is_empty() {
                bail!("workflow definition has no phases");
            }

            let workflow = Workflow::new(definition.name.clone(), definition.goal.clone());
            app.workflow_repo.create_workflow(&workflow).await?;

            for (i, phase_def) in definition.phases.iter().enumerate() {
                let mut phase = Phase::new(
                    workflow.id,
                    (i + 1) as i64,
                    phase_def.name.clone(),
                    phase_def.description.clone(),
                    phase_def.done_definitions.clone(),
                );
                phase.additional_notes = phase_def.additional_notes.clone();
                phase.outputs = phase_def.outputs.clone();
                phase.next_steps = phase_def.next_steps.clone();
                phase.working_directory = phase_def.working_directory.clone();
                phase.validation = phase_def.validation.clone();
                app.workflow_repo.create_phase(&phase).await?;
            }

            // Every workflow gets a board so ticket tracking works out of
            // the box.
            app.ticket_repo
                .save_board_config(&BoardConfig::default_for_workflow(
                    workflow.id,
                    format!("{} board", definition.name),
                ))
                .await?;

            println!(
                "Workflow '{}' loaded with {} phases (id {})",
                definition.name,
                definition.phases.len(),
                short(workflow.id)
            );
        }
        WorkflowCommands::Status => {
            let workflows = app.workflow_repo.list_active_workflows().await?;
            if workflows.is_empty() {
                println!("No active workflows");
                return Ok(());
            }
            for workflow in workflows {
                println!(
                    "{} {} [{}]",
                    short(workflow.id),
                    style(&workflow.name).bold(),
                    workflow.status.as_str()
                );
                let phases = app.workflow_repo.list_phases(workflow.id).await?;
                for phase in phases {
                    println!("  {}. {} [{}]", phase.seq, phase.name, phase.status.as_str());
                }
            }
        }
    }
    Ok(())
}
