#![forbid(unsafe_code)]

//! Task registry and the per-task workflow driver.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::agents::CodingAgents;
use crate::core::git::Repository;
use crate::core::naming;
use crate::error::CodeforgeError;
use crate::sandbox::Sandbox;
use crate::workflow::context::WorkflowContext;
use crate::workflow::request::CodingRequest;
use crate::workflow::steps::{self, StepFailure, StepOutcome};
use crate::workflow::task::{TaskRecord, TaskStatus};

/// Engine knobs, extracted from the loaded config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workspace_dir: PathBuf,
    pub max_concurrent_tasks: usize,
    /// Remove the task's checkout once it reaches a terminal state.
    pub cleanup_workspace: bool,
    /// target service name -> clone URL.
    pub repositories: BTreeMap<String, String>,
}

/// Collaborators and settings shared by all step handlers.
pub struct Collaborators {
    pub settings: EngineSettings,
    pub agents: Arc<dyn CodingAgents>,
    pub repository: Arc<dyn Repository>,
    pub sandbox: Arc<dyn Sandbox>,
}

/// Shared view of one task: its record plus the cancellation flag.
pub struct TaskHandle {
    pub record: Mutex<TaskRecord>,
    cancel: Mutex<Option<String>>,
}

impl TaskHandle {
    fn new(record: TaskRecord) -> Self {
        Self {
            record: Mutex::new(record),
            cancel: Mutex::new(None),
        }
    }

    async fn request_cancel(&self, reason: String) {
        let mut cancel = self.cancel.lock().await;
        if cancel.is_none() {
            *cancel = Some(reason);
        }
    }

    async fn take_cancel(&self) -> Option<String> {
        self.cancel.lock().await.take()
    }
}

/// One page of task snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskRecord>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// Orchestrates concurrent coding tasks. Cheap to clone; all clones
/// share the registry.
#[derive(Clone)]
pub struct WorkflowEngine {
    deps: Arc<Collaborators>,
    tasks: Arc<Mutex<HashMap<String, Arc<TaskHandle>>>>,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        agents: Arc<dyn CodingAgents>,
        repository: Arc<dyn Repository>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            deps: Arc::new(Collaborators {
                settings,
                agents,
                repository,
                sandbox,
            }),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validates the request, registers a task and spawns its workflow.
    /// Returns the initial snapshot; the caller polls for progress.
    pub async fn start_coding_workflow(
        &self,
        request: CodingRequest,
    ) -> Result<TaskRecord, CodeforgeError> {
        request.validate()?;

        let repo_url = self
            .deps
            .settings
            .repositories
            .get(&request.target_service)
            .cloned()
            .ok_or_else(|| {
                CodeforgeError::UnknownTargetService(request.target_service.clone())
            })?;

        let feature_name = naming::extract_feature_name(&request.requirements);
        let branch_name = naming::unique_branch_name(&feature_name);
        let record = TaskRecord::new(branch_name.clone(), request.estimated_duration());
        let task_id = record.task_id.clone();
        let snapshot = record.clone();
        let handle = Arc::new(TaskHandle::new(record));

        {
            let mut tasks = self.tasks.lock().await;
            let active = count_active(&tasks).await;
            let limit = self.deps.settings.max_concurrent_tasks;
            if active >= limit {
                return Err(CodeforgeError::AtCapacity(limit));
            }
            tasks.insert(task_id.clone(), Arc::clone(&handle));
        }

        info!(task_id = %task_id, service = %request.target_service, "workflow started");
        let ctx = WorkflowContext::new(request, task_id, feature_name, branch_name, repo_url);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_task(handle, ctx).await;
        });

        Ok(snapshot)
    }

    /// Snapshot of a task, terminal or not.
    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskRecord> {
        let handle = {
            let tasks = self.tasks.lock().await;
            tasks.get(task_id).cloned()
        }?;
        let record = handle.record.lock().await;
        Some(record.clone())
    }

    /// Requests cooperative cancellation. Returns `true` when the
    /// request was accepted; `false` when the task does not exist or
    /// had already finished.
    pub async fn cancel_task(&self, task_id: &str, reason: &str) -> bool {
        let Some(handle) = ({
            let tasks = self.tasks.lock().await;
            tasks.get(task_id).cloned()
        }) else {
            return false;
        };

        {
            let record = handle.record.lock().await;
            if record.status.is_terminal() {
                return false;
            }
        }
        handle.request_cancel(reason.to_owned()).await;
        info!(task_id = %task_id, reason = %reason, "cancellation requested");
        true
    }

    /// Newest-first page of snapshots, optionally filtered by status.
    pub async fn list_tasks(
        &self,
        page: usize,
        page_size: usize,
        status_filter: Option<TaskStatus>,
    ) -> TaskPage {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);

        let handles: Vec<Arc<TaskHandle>> = {
            let tasks = self.tasks.lock().await;
            tasks.values().cloned().collect()
        };
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = handle.record.lock().await;
            if status_filter.is_none_or(|s| record.status == s) {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.task_id.cmp(&b.task_id)));

        let total_count = records.len();
        let start = (page - 1) * page_size;
        let tasks: Vec<TaskRecord> = records.into_iter().skip(start).take(page_size).collect();
        let has_more = start + tasks.len() < total_count;
        TaskPage {
            tasks,
            total_count,
            page,
            page_size,
            has_more,
        }
    }

    /// Number of non-terminal tasks.
    pub async fn active_task_count(&self) -> usize {
        let tasks = self.tasks.lock().await;
        count_active(&tasks).await
    }

    /// Drives one task from initiated to a terminal state. Cancellation
    /// is observed between steps; soft failures record the problem and
    /// advance.
    async fn run_task(&self, handle: Arc<TaskHandle>, mut ctx: WorkflowContext) {
        let deps = &self.deps;
        let mut status = TaskStatus::Initiated;

        while let Some(next) = status.next() {
            if next == TaskStatus::Completed {
                let mut record = handle.record.lock().await;
                record.record_stat(
                    "total_duration_seconds",
                    json!(ctx.started.elapsed().as_secs_f64()),
                );
                record.complete();
                info!(task_id = %ctx.task_id, "workflow completed");
                break;
            }

            if let Some(reason) = handle.take_cancel().await {
                let mut record = handle.record.lock().await;
                record.cancel(reason);
                drop(record);
                info!(task_id = %ctx.task_id, "workflow cancelled");
                break;
            }

            {
                let mut record = handle.record.lock().await;
                record.enter(next);
                record.begin_step(next.as_str());
            }

            match steps::execute(next, deps, &handle, &mut ctx).await {
                Ok(StepOutcome::Completed) => {
                    let mut record = handle.record.lock().await;
                    record.complete_step();
                    record.advance_progress(next.progress());
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    let mut record = handle.record.lock().await;
                    record.skip_step(&reason);
                    record.advance_progress(next.progress());
                }
                Err(StepFailure::Soft(message)) => {
                    warn!(task_id = %ctx.task_id, step = %next, %message, "step failed (soft)");
                    let mut record = handle.record.lock().await;
                    record.fail_step(&message);
                    record.advance_progress(next.progress());
                }
                Err(StepFailure::Fatal(err)) => {
                    error!(task_id = %ctx.task_id, step = %next, error = %err, "step failed");
                    let mut record = handle.record.lock().await;
                    record.fail_step(&err.to_string());
                    record.fail(
                        format!("{next} failed: {err}"),
                        Some(json!({ "step": next.as_str() })),
                    );
                    break;
                }
            }
            status = next;
        }

        self.release_workspace(&ctx).await;
    }

    /// Workspace removal on terminal states; the record stays queryable.
    async fn release_workspace(&self, ctx: &WorkflowContext) {
        if !self.deps.settings.cleanup_workspace {
            return;
        }
        let Some(workspace) = &ctx.workspace else {
            return;
        };
        if let Err(e) = tokio::fs::remove_dir_all(workspace).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id = %ctx.task_id, error = %e, "workspace removal failed");
            }
        }
    }
}

async fn count_active(tasks: &HashMap<String, Arc<TaskHandle>>) -> usize {
    let mut active = 0;
    for handle in tasks.values() {
        let record = handle.record.lock().await;
        if !record.status.is_terminal() {
            active += 1;
        }
    }
    active
}
