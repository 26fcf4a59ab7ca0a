//! Shared integration-test harness: an assembled `App` over an in-memory
//! database, an in-memory session host, a scripted LLM, and a real temp git
//! repository for worktrees.

use std::path::Path;
use std::sync::Arc;

use hephaestus::adapters::llm::MockLlmClient;
use hephaestus::adapters::sqlite::create_migrated_test_pool;
use hephaestus::adapters::tmux::InMemorySessionHost;
use hephaestus::app::App;
use hephaestus::domain::models::Config;
use tempfile::TempDir;

pub struct TestApp {
    pub app: Arc<App>,
    pub host: Arc<InMemorySessionHost>,
    pub llm: Arc<MockLlmClient>,
    pub repo_path: std::path::PathBuf,
    _tmp: TempDir,
}

async fn git(dir: &Path, args: &[&str]) {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .expect("git spawns");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

async fn init_repo(dir: &Path) {
    git(dir, &["init", "-b", "main"]).await;
    git(dir, &["config", "user.email", "test@example.com"]).await;
    git(dir, &["config", "user.name", "Test"]).await;
    tokio::fs::write(dir.join("README.md"), "hello\n").await.unwrap();
    git(dir, &["add", "-A"]).await;
    git(dir, &["commit", "-m", "init"]).await;
}

/// Build a test app with the given tweaks applied to the default config.
pub async fn build_app(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let repo_path = tmp.path().join("repo");
    tokio::fs::create_dir_all(&repo_path).await.unwrap();
    init_repo(&repo_path).await;

    let mut config = Config::default();
    config.main_repo_path = repo_path.clone();
    config.worktrees_path = tmp.path().join("worktrees");
    // Tests drive ticks manually; zero out the age/grace gates.
    config.monitoring.guardian_min_agent_age_seconds = 0;
    config.monitoring.interval_seconds = 0;
    tweak(&mut config);

    let pool = create_migrated_test_pool().await.unwrap();
    let host = Arc::new(InMemorySessionHost::new());
    let llm = Arc::new(MockLlmClient::new());

    let app = Arc::new(
        App::assemble(config, pool, host.clone(), llm.clone(), None).unwrap(),
    );
    TestApp { app, host, llm, repo_path, _tmp: tmp }
}
