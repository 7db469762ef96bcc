#![forbid(unsafe_code)]

//! Engine integration tests with mock collaborators.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use codeforge::agents::{CodingAgents, ImplementationPlan, PlanAnalysis, PlannedFile};
use codeforge::core::analysis::RepositoryAnalysis;
use codeforge::core::complexity::Complexity;
use codeforge::core::git::Repository;
use codeforge::error::CodeforgeError;
use codeforge::sandbox::{Sandbox, SandboxEnvironment, TestReport};
use codeforge::workflow::engine::{EngineSettings, WorkflowEngine};
use codeforge::workflow::request::CodingRequest;
use codeforge::workflow::task::{TaskRecord, TaskStatus};

#[derive(Default)]
struct MockAgents {
    plan_files: Vec<String>,
    fail_plan: bool,
    fail_files: Vec<String>,
    plan_delay: Option<Duration>,
    /// Repository file count seen by the last `generate_code` call.
    seen_repo_files: AtomicUsize,
}

#[async_trait]
impl CodingAgents for MockAgents {
    async fn plan(
        &self,
        _request: &CodingRequest,
        _analysis: &RepositoryAnalysis,
    ) -> Result<ImplementationPlan, CodeforgeError> {
        if let Some(delay) = self.plan_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_plan {
            return Err(CodeforgeError::collaborator("runner", "model unavailable"));
        }
        Ok(ImplementationPlan {
            analysis: PlanAnalysis {
                summary: "add the endpoint".to_owned(),
                complexity: Complexity::Low,
                tasks: vec!["write handler".to_owned()],
            },
            files_to_create: self
                .plan_files
                .iter()
                .map(|p| PlannedFile {
                    path: p.clone(),
                    changes: "new file".to_owned(),
                })
                .collect(),
            ..ImplementationPlan::default()
        })
    }

    async fn generate_code(
        &self,
        _request: &CodingRequest,
        analysis: &RepositoryAnalysis,
        _plan: &ImplementationPlan,
        file: &PlannedFile,
    ) -> Result<String, CodeforgeError> {
        self.seen_repo_files
            .store(analysis.total_files, Ordering::SeqCst);
        if self.fail_files.contains(&file.path) {
            return Err(CodeforgeError::collaborator("runner", "generation refused"));
        }
        Ok(format!("# generated for {}\n", file.path))
    }

    async fn generate_tests(
        &self,
        _request: &CodingRequest,
        _analysis: &RepositoryAnalysis,
        _plan: &ImplementationPlan,
        _generated: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, CodeforgeError> {
        let mut tests = BTreeMap::new();
        tests.insert(
            "tests/test_generated.py".to_owned(),
            "def test_ok():\n    assert True\n".to_owned(),
        );
        Ok(tests)
    }
}

struct MockRepository;

#[async_trait]
impl Repository for MockRepository {
    async fn clone_repo(
        &self,
        _url: &str,
        dest: &Path,
        _base_branch: &str,
    ) -> Result<(), CodeforgeError> {
        let io_err = |source| CodeforgeError::IoPath {
            path: dest.to_path_buf(),
            source,
        };
        // A checkout with some structure, so the scan has material.
        tokio::fs::create_dir_all(dest).await.map_err(io_err)?;
        tokio::fs::write(dest.join("requirements.txt"), "fastapi\n")
            .await
            .map_err(io_err)?;
        tokio::fs::write(dest.join("main.py"), "# service entry\n")
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn create_branch(&self, _workspace: &Path, _branch: &str) -> Result<(), CodeforgeError> {
        Ok(())
    }

    async fn write_files(
        &self,
        _workspace: &Path,
        files: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, CodeforgeError> {
        Ok(files.keys().cloned().collect())
    }

    async fn commit_all(&self, _workspace: &Path, _message: &str) -> Result<String, CodeforgeError> {
        Ok("deadbeefcafe".to_owned())
    }

    async fn push(&self, _workspace: &Path, _branch: &str) -> Result<(), CodeforgeError> {
        Ok(())
    }

    async fn create_pull_request(
        &self,
        _repo_url: &str,
        _head: &str,
        _base: &str,
        _title: &str,
        _body: &str,
    ) -> Result<String, CodeforgeError> {
        Ok("https://github.com/acme/market-predictor/pull/42".to_owned())
    }
}

#[derive(Default)]
struct MockSandbox {
    fail_create: bool,
    report_success: bool,
    creates: AtomicUsize,
    cleanups: AtomicUsize,
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn create_environment(
        &self,
        task_id: &str,
        _workspace: &Path,
    ) -> Result<SandboxEnvironment, CodeforgeError> {
        if self.fail_create {
            return Err(CodeforgeError::collaborator("sandbox", "docker daemon down"));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxEnvironment::new(
            "abc12345".to_owned(),
            task_id.to_owned(),
            "codeforge-test-abc12345".to_owned(),
        ))
    }

    async fn install_dependencies(
        &self,
        _env: &mut SandboxEnvironment,
    ) -> Result<(), CodeforgeError> {
        Ok(())
    }

    async fn start_service(&self, _env: &mut SandboxEnvironment) -> Result<(), CodeforgeError> {
        Ok(())
    }

    async fn run_tests(&self, _env: &mut SandboxEnvironment) -> Result<TestReport, CodeforgeError> {
        Ok(TestReport {
            passed: if self.report_success { 3 } else { 1 },
            failed: usize::from(!self.report_success),
            skipped: 0,
            total: if self.report_success { 3 } else { 2 },
            success: self.report_success,
            ..TestReport::default()
        })
    }

    async fn cleanup(&self, _env: &mut SandboxEnvironment) -> Result<(), CodeforgeError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    engine: WorkflowEngine,
    agents: Arc<MockAgents>,
    sandbox: Arc<MockSandbox>,
    _workspace: tempfile::TempDir,
}

fn harness(agents: MockAgents, sandbox: MockSandbox, max_concurrent: usize) -> Harness {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut repositories = BTreeMap::new();
    repositories.insert(
        "market-predictor".to_owned(),
        "https://github.com/acme/market-predictor.git".to_owned(),
    );
    let settings = EngineSettings {
        workspace_dir: workspace.path().to_path_buf(),
        max_concurrent_tasks: max_concurrent,
        cleanup_workspace: true,
        repositories,
    };
    let agents = Arc::new(agents);
    let sandbox = Arc::new(sandbox);
    let engine = WorkflowEngine::new(
        settings,
        Arc::clone(&agents) as Arc<dyn CodingAgents>,
        Arc::new(MockRepository),
        Arc::clone(&sandbox) as Arc<dyn Sandbox>,
    );
    Harness {
        engine,
        agents,
        sandbox,
        _workspace: workspace,
    }
}

fn good_agents() -> MockAgents {
    MockAgents {
        plan_files: vec!["src/api.py".to_owned(), "src/models.py".to_owned()],
        ..MockAgents::default()
    }
}

fn good_sandbox() -> MockSandbox {
    MockSandbox {
        report_success: true,
        ..MockSandbox::default()
    }
}

fn request() -> CodingRequest {
    CodingRequest::new(
        "Add a /api/v1/status endpoint that returns current timestamp and uptime",
        "market-predictor",
    )
}

async fn wait_terminal(engine: &WorkflowEngine, task_id: &str) -> TaskRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = engine
            .get_task_status(task_id)
            .await
            .expect("task stays queryable");
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task did not finish: {:?}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn start_returns_immediately_with_initial_snapshot() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();

    assert!(snapshot.task_id.starts_with("task_"));
    assert_eq!(snapshot.status, TaskStatus::Initiated);
    assert_eq!(snapshot.progress_percentage, 0);
    assert!(!snapshot.branch_name.is_empty());
    assert_eq!(snapshot.estimated_duration, "5-10 minutes");

    let _ = wait_terminal(&h.engine, &snapshot.task_id).await;
}

#[tokio::test]
async fn happy_path_reaches_completed_with_pr() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.progress_percentage, 100);
    assert_eq!(record.commit_hash.as_deref(), Some("deadbeefcafe"));
    assert_eq!(
        record.pr_url.as_deref(),
        Some("https://github.com/acme/market-predictor/pull/42")
    );
    assert!(record.completed_at.is_some());
    // 2 planned files + generated tests
    assert_eq!(record.code_changes.len(), 3);
    assert!(!record.test_results.is_empty());
    assert!(!record.validation_results.is_empty());

    // Every step in the log finished one way or another.
    assert_eq!(record.workflow_steps.len(), 8);
    assert!(
        record
            .workflow_steps
            .iter()
            .all(|s| s.status == "completed")
    );

    assert_eq!(h.sandbox.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn code_generation_receives_repository_scan() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Completed);
    // The checkout scan made it into the generation calls.
    assert_eq!(h.agents.seen_repo_files.load(Ordering::SeqCst), 2);
    assert_eq!(
        record.statistics.get("repository_files"),
        Some(&serde_json::json!(2))
    );
}

#[tokio::test]
async fn terminal_snapshots_are_stable() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let first = wait_terminal(&h.engine, &snapshot.task_id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h.engine.get_task_status(&snapshot.task_id).await.unwrap();

    assert_eq!(first.updated_at, second.updated_at);
    assert_eq!(first.progress_percentage, second.progress_percentage);
    assert_eq!(first.workflow_steps.len(), second.workflow_steps.len());
}

#[tokio::test]
async fn invalid_request_creates_no_task() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let err = h
        .engine
        .start_coding_workflow(CodingRequest::new("fix", "market-predictor"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(h.engine.active_task_count().await, 0);
}

#[tokio::test]
async fn unknown_service_is_rejected() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let mut req = request();
    req.target_service = "unmapped".to_owned();
    let err = h.engine.start_coding_workflow(req).await.unwrap_err();
    assert!(matches!(err, CodeforgeError::UnknownTargetService(_)));
}

#[tokio::test]
async fn planning_failure_is_fatal_but_queryable() {
    let agents = MockAgents {
        fail_plan: true,
        ..good_agents()
    };
    let h = harness(agents, good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Failed);
    let message = record.error_message.expect("error recorded");
    assert!(message.contains("planning"), "got {message}");
    // No sandbox was ever touched.
    assert_eq!(h.sandbox.creates.load(Ordering::SeqCst), 0);
    assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn partial_coding_failure_continues() {
    let agents = MockAgents {
        plan_files: vec![
            "src/api.py".to_owned(),
            "src/models.py".to_owned(),
            "src/cache.py".to_owned(),
        ],
        fail_files: vec!["src/cache.py".to_owned()],
        ..MockAgents::default()
    };
    let h = harness(agents, good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Completed);
    // 2 surviving files + generated tests
    assert_eq!(record.code_changes.len(), 3);
    let failed = record
        .statistics
        .get("coding_failed_files")
        .expect("failed files recorded");
    assert_eq!(failed, &serde_json::json!(["src/cache.py"]));
}

#[tokio::test]
async fn coding_fails_when_nothing_is_generated() {
    let agents = MockAgents {
        plan_files: vec!["src/api.py".to_owned()],
        fail_files: vec!["src/api.py".to_owned()],
        ..MockAgents::default()
    };
    let h = harness(agents, good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.error_message.unwrap().contains("coding"));
}

#[tokio::test]
async fn sandbox_create_failure_is_soft() {
    let sandbox = MockSandbox {
        fail_create: true,
        ..MockSandbox::default()
    };
    let h = harness(good_agents(), sandbox, 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(
        record.statistics.get("testing_failed"),
        Some(&serde_json::json!(true))
    );
    let testing = record
        .workflow_steps
        .iter()
        .find(|s| s.step_name == "testing")
        .expect("testing step logged");
    assert_eq!(testing.status, "failed");
    // Nothing was created, so nothing to clean up.
    assert_eq!(h.sandbox.creates.load(Ordering::SeqCst), 0);
    assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_tests_do_not_sink_the_task() {
    let sandbox = MockSandbox {
        report_success: false,
        ..MockSandbox::default()
    };
    let h = harness(good_agents(), sandbox, 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(
        record.statistics.get("testing_failed"),
        Some(&serde_json::json!(true))
    );
    assert_eq!(h.sandbox.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skip_tests_never_touches_the_sandbox() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let mut req = request();
    req.skip_tests = true;
    let snapshot = h.engine.start_coding_workflow(req).await.unwrap();
    let record = wait_terminal(&h.engine, &snapshot.task_id).await;

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(
        record.statistics.get("tests_skipped"),
        Some(&serde_json::json!(true))
    );
    let testing = record
        .workflow_steps
        .iter()
        .find(|s| s.step_name == "testing")
        .expect("testing step logged");
    assert_eq!(testing.status, "skipped");
    assert_eq!(h.sandbox.creates.load(Ordering::SeqCst), 0);
    assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_is_observed_at_step_boundaries() {
    let agents = MockAgents {
        plan_delay: Some(Duration::from_millis(300)),
        ..good_agents()
    };
    let h = harness(agents, good_sandbox(), 5);
    let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let accepted = h
        .engine
        .cancel_task(&snapshot.task_id, "user changed their mind")
        .await;
    assert!(accepted);

    let record = wait_terminal(&h.engine, &snapshot.task_id).await;
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert!(
        record
            .error_message
            .as_deref()
            .unwrap()
            .contains("user changed their mind")
    );

    // Cancelling a finished task is refused, not an error.
    let again = h.engine.cancel_task(&snapshot.task_id, "again").await;
    assert!(!again);
}

#[tokio::test]
async fn cancelling_unknown_task_reports_false() {
    let h = harness(good_agents(), good_sandbox(), 5);
    assert!(!h.engine.cancel_task("task_000000000000", "nope").await);
}

#[tokio::test]
async fn capacity_limit_rejects_new_tasks() {
    let agents = MockAgents {
        plan_delay: Some(Duration::from_secs(2)),
        ..good_agents()
    };
    let h = harness(agents, good_sandbox(), 1);
    let first = h.engine.start_coding_workflow(request()).await.unwrap();
    assert_eq!(h.engine.active_task_count().await, 1);

    let err = h.engine.start_coding_workflow(request()).await.unwrap_err();
    assert!(matches!(err, CodeforgeError::AtCapacity(1)));

    let _ = h.engine.cancel_task(&first.task_id, "test over").await;
    let _ = wait_terminal(&h.engine, &first.task_id).await;
}

#[tokio::test]
async fn listing_paginates_and_filters() {
    let h = harness(good_agents(), good_sandbox(), 5);
    let mut ids = Vec::new();
    for _ in 0..3 {
        let snapshot = h.engine.start_coding_workflow(request()).await.unwrap();
        ids.push(snapshot.task_id);
    }
    for id in &ids {
        let _ = wait_terminal(&h.engine, id).await;
    }

    let page = h.engine.list_tasks(1, 2, None).await;
    assert_eq!(page.total_count, 3);
    assert_eq!(page.tasks.len(), 2);
    assert!(page.has_more);

    let page2 = h.engine.list_tasks(2, 2, None).await;
    assert_eq!(page2.tasks.len(), 1);
    assert!(!page2.has_more);

    let completed = h
        .engine
        .list_tasks(1, 50, Some(TaskStatus::Completed))
        .await;
    assert_eq!(completed.total_count, 3);
    let failed = h.engine.list_tasks(1, 50, Some(TaskStatus::Failed)).await;
    assert_eq!(failed.total_count, 0);
}
