//! Configuration tree for the orchestrator.
//!
//! Loaded by the figment-based loader in `infrastructure::config` with
//! defaults → project yaml → local yaml → `HEPHAESTUS_*` env precedence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of concurrently active agents
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Path of the repository agents work on
    #[serde(default = "default_main_repo_path")]
    pub main_repo_path: PathBuf,

    /// Root directory for per-agent worktrees
    #[serde(default = "default_worktrees_path")]
    pub worktrees_path: PathBuf,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub qdrant: QdrantConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub diagnostic: DiagnosticConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

const fn default_max_concurrent_agents() -> usize {
    4
}

fn default_main_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_worktrees_path() -> PathBuf {
    PathBuf::from(".hephaestus/worktrees")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            main_repo_path: default_main_repo_path(),
            worktrees_path: default_worktrees_path(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
            qdrant: QdrantConfig::default(),
            agent: AgentConfig::default(),
            dedup: DedupConfig::default(),
            monitoring: MonitoringConfig::default(),
            diagnostic: DiagnosticConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".hephaestus/hephaestus.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for rolling file output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// LLM provider configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key (falls back to OPENAI_API_KEY env)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat model for enrichment and analyses
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Embedding model for deduplication and search
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Per-request timeout
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Requests per second allowed against the provider
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Burst size for the token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Max retry attempts for transient failures
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-5".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_llm_timeout_secs() -> u64 {
    120
}

const fn default_requests_per_second() -> u32 {
    5
}

const fn default_burst_size() -> u32 {
    10
}

const fn default_llm_max_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_llm_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            max_retries: default_llm_max_retries(),
        }
    }
}

impl LlmConfig {
    /// API key from config or environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QdrantConfig {
    /// Qdrant base URL; semantic search degrades to keyword search when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Collection name for ticket/memory vectors
    #[serde(default = "default_qdrant_collection")]
    pub collection: String,
}

fn default_qdrant_collection() -> String {
    "hephaestus".to_string()
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection: default_qdrant_collection(),
        }
    }
}

/// Agent session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// CLI launched inside each session
    #[serde(default = "default_cli_command")]
    pub cli_command: String,

    /// Prefix for session names; orphan GC matches on this
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
}

fn default_cli_command() -> String {
    "claude".to_string()
}

fn default_session_prefix() -> String {
    "agent-".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cli_command: default_cli_command(),
            session_prefix: default_session_prefix(),
        }
    }
}

/// Task deduplication thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DedupConfig {
    #[serde(default = "default_dedup_enabled")]
    pub enabled: bool,

    /// Similarity at or above which a task is a duplicate
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Similarity at or above which tasks are related
    #[serde(default = "default_related_threshold")]
    pub related_threshold: f32,
}

const fn default_dedup_enabled() -> bool {
    true
}

const fn default_similarity_threshold() -> f32 {
    0.85
}

const fn default_related_threshold() -> f32 {
    0.70
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: default_dedup_enabled(),
            similarity_threshold: default_similarity_threshold(),
            related_threshold: default_related_threshold(),
        }
    }
}

/// Monitoring loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitoringConfig {
    /// Tick period of the monitor loop
    #[serde(default = "default_monitoring_interval")]
    pub interval_seconds: u64,

    /// Agents younger than this are skipped by the Guardian
    #[serde(default = "default_min_agent_age")]
    pub guardian_min_agent_age_seconds: u64,

    /// Trailing lines captured per Guardian analysis
    #[serde(default = "default_tmux_output_lines")]
    pub tmux_output_lines: usize,

    /// Idle minutes before an agent counts as stuck
    #[serde(default = "default_stuck_detection_minutes")]
    pub stuck_detection_minutes: u64,

    /// Base task timeout, scaled by estimated complexity
    #[serde(default = "default_agent_timeout_minutes")]
    pub agent_timeout_minutes: u64,

    /// Ceiling for health_check_failures
    #[serde(default = "default_max_health_check_failures")]
    pub max_health_check_failures: i32,

    /// Minimum seconds between steering messages per agent
    #[serde(default = "default_steering_interval")]
    pub steering_interval_seconds: u64,
}

const fn default_monitoring_interval() -> u64 {
    30
}

const fn default_min_agent_age() -> u64 {
    60
}

const fn default_tmux_output_lines() -> usize {
    200
}

const fn default_stuck_detection_minutes() -> u64 {
    10
}

const fn default_agent_timeout_minutes() -> u64 {
    60
}

const fn default_max_health_check_failures() -> i32 {
    5
}

const fn default_steering_interval() -> u64 {
    300
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_monitoring_interval(),
            guardian_min_agent_age_seconds: default_min_agent_age(),
            tmux_output_lines: default_tmux_output_lines(),
            stuck_detection_minutes: default_stuck_detection_minutes(),
            agent_timeout_minutes: default_agent_timeout_minutes(),
            max_health_check_failures: default_max_health_check_failures(),
            steering_interval_seconds: default_steering_interval(),
        }
    }
}

impl MonitoringConfig {
    /// Grace period for orphan-session GC.
    pub fn orphan_grace_seconds(&self) -> u64 {
        (self.interval_seconds * 2).max(self.guardian_min_agent_age_seconds)
    }
}

/// Stuck-workflow diagnostic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticConfig {
    #[serde(default = "default_diagnostic_enabled")]
    pub enabled: bool,

    /// Minimum seconds between diagnostic runs per workflow
    #[serde(default = "default_diagnostic_cooldown")]
    pub cooldown_seconds: u64,

    /// Seconds since last task activity before the workflow counts as stuck
    #[serde(default = "default_min_stuck_time")]
    pub min_stuck_time_seconds: u64,

    /// Recent terminated agents included in the diagnostic context
    #[serde(default = "default_max_agents_to_analyze")]
    pub max_agents_to_analyze: usize,

    /// Recent conductor analyses included in the diagnostic context
    #[serde(default = "default_max_conductor_analyses")]
    pub max_conductor_analyses: usize,
}

const fn default_diagnostic_enabled() -> bool {
    true
}

const fn default_diagnostic_cooldown() -> u64 {
    60
}

const fn default_min_stuck_time() -> u64 {
    60
}

const fn default_max_agents_to_analyze() -> usize {
    10
}

const fn default_max_conductor_analyses() -> usize {
    5
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            enabled: default_diagnostic_enabled(),
            cooldown_seconds: default_diagnostic_cooldown(),
            min_stuck_time_seconds: default_min_stuck_time(),
            max_agents_to_analyze: default_max_agents_to_analyze(),
            max_conductor_analyses: default_max_conductor_analyses(),
        }
    }
}

/// Background queue processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Forward-progress timer period
    #[serde(default = "default_processor_interval")]
    pub processor_interval_seconds: u64,
}

const fn default_processor_interval() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            processor_interval_seconds: default_processor_interval(),
        }
    }
}
