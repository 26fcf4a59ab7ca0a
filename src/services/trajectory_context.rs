//! Accumulated-context builder for Guardian analyses.
//!
//! Rebuilds a distilled understanding of an agent's whole session from its
//! logs: overall goal, goal evolution, constraints (and those later lifted),
//! standing instructions, resolved this/that references, discovered blockers,
//! and current focus. Extraction is deterministic regex rules; a pluggable
//! step that could be swapped for a structured LLM call if the rules prove
//! brittle.

use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentLog, LogKind, Task};
use crate::domain::ports::{AgentRepository, TaskRepository};

const MAX_CONSTRAINTS: usize = 10;
const MAX_STANDING_INSTRUCTIONS: usize = 5;
const MAX_BLOCKERS: usize = 10;
const MAX_APPROACHES: usize = 10;
const MAX_GOAL_EVOLUTIONS: usize = 5;

/// Distilled understanding of an agent's session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccumulatedContext {
    pub overall_goal: String,
    pub done_definition: String,
    pub evolved_goals: Vec<String>,
    pub constraints: Vec<String>,
    pub lifted_constraints: Vec<String>,
    pub standing_instructions: Vec<String>,
    /// Resolved "this/that/it" references bound to recent nouns
    pub references: Vec<(String, String)>,
    pub discovered_blockers: Vec<String>,
    pub attempted_approaches: Vec<String>,
    pub current_focus: String,
    pub conversation_length: usize,
    pub session_duration_seconds: i64,
}

struct Patterns {
    goal: Vec<Regex>,
    evolution: Vec<Regex>,
    constraint: Vec<Regex>,
    lift: Vec<Regex>,
    instruction: Vec<Regex>,
    concept: Vec<Regex>,
    reference: Regex,
    blocker: Vec<Regex>,
    approach: Vec<Regex>,
}

impl Patterns {
    fn compile() -> Self {
        let build = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern compiles"))
                .collect()
        };

        Self {
            goal: build(&[
                r"(?:the goal is|we need to|task is to|objective:)\s*([^.\n]+)",
                r"(?:working on|focused on|trying to)\s+([^.\n]+)",
            ]),
            evolution: build(&[
                r"(?:now|next|then) (?:we need to|let's|i'll)\s+([^.\n]+)",
                r"(?:actually|instead|rather),?\s+(?:we should|let's)\s+([^.\n]+)",
                r"(?:changing|switching|pivoting) (?:to|towards?)\s+([^.\n]+)",
            ]),
            constraint: build(&[
                r"(?:don't|do not|never|avoid)\s+([^.\n]+)",
                r"(?:only use|must use|should use)\s+([^.\n]+)",
                r"(?:constraint:|requirement:|rule:)\s*([^.\n]+)",
            ]),
            lift: build(&[
                r"(?:you can now|feel free to|go ahead and)\s+([^.\n]+)",
                r"(?:constraint lifted:|no longer need to:|don't worry about)\s+([^.\n]+)",
            ]),
            instruction: build(&[
                r"(?:always|make sure to|remember to)\s+([^.\n]+)",
                r"(?:important:|note:|remember:)\s*([^.\n]+)",
            ]),
            concept: build(&[
                r"(?:file|function|class|module|component|feature|bug|error|issue)\s+called\s+(\S+)",
                r"(?:the|a)\s+(\w+\.(?:py|js|ts|tsx|jsx|java|go|rs|cpp|c|h))",
                r"(?:implement|create|fix|update|modify)\s+(?:the\s+)?(\w+(?:\s+\w+)?)",
            ]),
            reference: Regex::new(r"(?i)\b(this|that|it)\b").expect("static pattern compiles"),
            blocker: build(&[
                r"(?:blocked by|stuck on|waiting for)\s+([^.\n]+)",
                r"(?:can't|cannot|unable to)\s+([^.\n]+)",
                r"(?:error:|issue:|problem:)\s*([^.\n]+)",
            ]),
            approach: build(&[
                r"(?:trying|attempting|going to try)\s+([^.\n]+)",
                r"(?:approach:|strategy:|plan:)\s*([^.\n]+)",
            ]),
        }
    }

    fn extract_all(regexes: &[Regex], text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for re in regexes {
            for caps in re.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    out.push(m.as_str().trim().to_string());
                }
            }
        }
        out
    }
}

/// Builds accumulated context from agent logs.
pub struct TrajectoryContext {
    agent_repo: Arc<dyn AgentRepository>,
    task_repo: Arc<dyn TaskRepository>,
    patterns: Patterns,
}

impl TrajectoryContext {
    pub fn new(agent_repo: Arc<dyn AgentRepository>, task_repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            agent_repo,
            task_repo,
            patterns: Patterns::compile(),
        }
    }

    /// Build the accumulated context for an agent from its full log history.
    pub async fn build(&self, agent_id: Uuid, task_id: Option<Uuid>) -> DomainResult<AccumulatedContext> {
        let logs = self
            .agent_repo
            .logs_for_agent(
                agent_id,
                &[
                    LogKind::Input,
                    LogKind::Output,
                    LogKind::Message,
                    LogKind::Steering,
                    LogKind::Intervention,
                ],
            )
            .await?;

        let task = match task_id {
            Some(id) => self.task_repo.get(id).await?,
            None => None,
        };

        if logs.is_empty() {
            tracing::warn!(%agent_id, "No logs found for accumulated context");
            return Ok(self.empty_context(task.as_ref()));
        }

        let mut context = self.empty_context(task.as_ref());
        context.conversation_length = logs.len();
        context.session_duration_seconds = session_duration_seconds(&logs);

        let mut recent_concepts: Vec<String> = Vec::new();

        for log in &logs {
            let text = &log.message;

            for goal in Patterns::extract_all(&self.patterns.goal, text) {
                if goal.len() > 20 && goal.len() > context.overall_goal.len() / 2 {
                    context.overall_goal = capitalize(&goal);
                }
            }

            for evolved in Patterns::extract_all(&self.patterns.evolution, text) {
                if evolved.len() > 20 {
                    context.evolved_goals.push(evolved);
                }
            }

            for constraint in Patterns::extract_all(&self.patterns.constraint, text) {
                let constraint = constraint.to_lowercase();
                if constraint.len() > 10 && !context.constraints.contains(&constraint) {
                    context.constraints.push(constraint);
                }
            }

            for lifted in Patterns::extract_all(&self.patterns.lift, text) {
                let lifted = lifted.to_lowercase();
                context.constraints.retain(|c| c != &lifted);
                if !context.lifted_constraints.contains(&lifted) {
                    context.lifted_constraints.push(lifted);
                }
            }

            for blocker in Patterns::extract_all(&self.patterns.blocker, text) {
                if blocker.len() > 10 && !context.discovered_blockers.contains(&blocker) {
                    context.discovered_blockers.push(blocker);
                }
            }

            for approach in Patterns::extract_all(&self.patterns.approach, text) {
                if approach.len() > 20 {
                    context.attempted_approaches.push(approach);
                }
            }

            // Bind this/that/it to the most recent noun from earlier messages,
            // then fold this message's concepts into the window.
            if self.patterns.reference.is_match(text) {
                if let Some(target) = recent_concepts.last() {
                    let m = self
                        .patterns
                        .reference
                        .find(text)
                        .map(|m| m.as_str().to_lowercase())
                        .unwrap_or_default();
                    context.references.push((m, target.clone()));
                }
            }
            for concept in Patterns::extract_all(&self.patterns.concept, text) {
                recent_concepts.push(concept);
            }
            if recent_concepts.len() > 10 {
                let excess = recent_concepts.len() - 10;
                recent_concepts.drain(..excess);
            }
        }

        // Standing instructions come from the early conversation only.
        for log in logs.iter().take(20) {
            for instruction in Patterns::extract_all(&self.patterns.instruction, &log.message) {
                if instruction.len() > 15 && !context.standing_instructions.contains(&instruction) {
                    context.standing_instructions.push(instruction);
                }
            }
        }

        context.current_focus = current_focus(&logs);

        trim_to(&mut context.constraints, MAX_CONSTRAINTS);
        trim_to(&mut context.standing_instructions, MAX_STANDING_INSTRUCTIONS);
        trim_to(&mut context.discovered_blockers, MAX_BLOCKERS);
        keep_last(&mut context.attempted_approaches, MAX_APPROACHES);
        keep_last(&mut context.evolved_goals, MAX_GOAL_EVOLUTIONS);

        Ok(context)
    }

    fn empty_context(&self, task: Option<&Task>) -> AccumulatedContext {
        AccumulatedContext {
            overall_goal: task
                .map(|t| t.description().to_string())
                .unwrap_or_else(|| "Complete assigned task".to_string()),
            done_definition: task
                .map(|t| t.done_definition.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            current_focus: "initializing".to_string(),
            ..AccumulatedContext::default()
        }
    }
}

fn trim_to(items: &mut Vec<String>, max: usize) {
    items.truncate(max);
}

fn keep_last(items: &mut Vec<String>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn session_duration_seconds(logs: &[AgentLog]) -> i64 {
    match (logs.first(), logs.last()) {
        (Some(first), Some(last)) => (last.created_at - first.created_at).num_seconds(),
        _ => 0,
    }
}

/// Keyword vote over the last ten messages.
fn current_focus(logs: &[AgentLog]) -> String {
    let focus_keywords: [(&str, &[&str]); 5] = [
        ("exploring", &["reading", "examining", "looking at", "exploring"]),
        ("implementing", &["creating", "writing", "implementing", "coding"]),
        ("debugging", &["error", "bug", "issue", "problem", "fixing"]),
        ("testing", &["test", "verify", "check", "validate"]),
        ("planning", &["plan", "approach", "design", "architect"]),
    ];

    let recent = &logs[logs.len().saturating_sub(10)..];
    let mut best = ("working", 0usize);
    for (focus, keywords) in &focus_keywords {
        let score: usize = recent
            .iter()
            .map(|log| {
                let lower = log.message.to_lowercase();
                keywords.iter().filter(|k| lower.contains(**k)).count()
            })
            .sum();
        if score > best.1 {
            best = (focus, score);
        }
    }
    if logs.is_empty() {
        "initializing".to_string()
    } else {
        best.0.to_string()
    }
}
