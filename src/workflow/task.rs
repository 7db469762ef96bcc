#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of a coding task, in forward order.
///
/// `Failed` and `Cancelled` are terminal and reachable from any
/// non-terminal state; the remaining states only advance forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Initiated,
    Analyzing,
    Planning,
    Cloning,
    Coding,
    Testing,
    Validating,
    Committing,
    PrCreating,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Progress reached once the step for this state has completed.
    #[must_use]
    pub fn progress(self) -> u8 {
        match self {
            Self::Initiated => 0,
            Self::Analyzing => 10,
            Self::Planning => 20,
            Self::Cloning => 30,
            Self::Coding => 50,
            Self::Testing => 70,
            Self::Validating => 85,
            Self::Committing => 92,
            Self::PrCreating => 97,
            Self::Completed => 100,
            Self::Failed | Self::Cancelled => 0,
        }
    }

    /// The state that follows this one on success.
    #[must_use]
    pub fn next(self) -> Option<TaskStatus> {
        match self {
            Self::Initiated => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Planning),
            Self::Planning => Some(Self::Cloning),
            Self::Cloning => Some(Self::Coding),
            Self::Coding => Some(Self::Testing),
            Self::Testing => Some(Self::Validating),
            Self::Validating => Some(Self::Committing),
            Self::Committing => Some(Self::PrCreating),
            Self::PrCreating => Some(Self::Completed),
            Self::Completed | Self::Failed | Self::Cancelled => None,
        }
    }

    /// Human-readable description of the active step.
    #[must_use]
    pub fn step_description(self) -> &'static str {
        match self {
            Self::Initiated => "Initializing workflow",
            Self::Analyzing => "Analyzing requirements and codebase",
            Self::Planning => "Creating implementation plan",
            Self::Cloning => "Cloning repository and creating branch",
            Self::Coding => "Generating code implementation",
            Self::Testing => "Running tests in isolated environment",
            Self::Validating => "Validating generated code",
            Self::Committing => "Committing changes",
            Self::PrCreating => "Creating pull request",
            Self::Completed => "Workflow completed successfully",
            Self::Failed => "Workflow failed",
            Self::Cancelled => "Workflow cancelled",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::Cloning => "cloning",
            Self::Coding => "coding",
            Self::Testing => "testing",
            Self::Validating => "validating",
            Self::Committing => "committing",
            Self::PrCreating => "pr_creating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the append-only step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_name: String,
    /// "in_progress", "completed", "failed" or "skipped".
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    #[serde(skip)]
    started_instant: Option<Instant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeChange {
    pub file_path: String,
    /// "created", "modified" or "deleted".
    pub change_type: String,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    /// "passed", "failed" or "skipped".
    pub status: String,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check_name: String,
    /// "passed", "failed" or "warning".
    pub status: String,
    pub message: String,
}

/// Durable per-task state, mutated only by the engine task that owns it.
///
/// Clients receive clones; once a record reaches a terminal status no
/// further mutation happens and repeated snapshots are identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub progress_percentage: u8,
    pub current_step: String,
    pub workflow_steps: Vec<WorkflowStep>,
    pub branch_name: String,
    pub estimated_duration: String,
    pub code_changes: Vec<CodeChange>,
    pub test_results: Vec<TestResult>,
    pub validation_results: Vec<ValidationResult>,
    pub pr_url: Option<String>,
    pub commit_hash: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub statistics: BTreeMap<String, serde_json::Value>,
}

#[must_use]
pub fn new_task_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    let short: String = id.chars().take(12).collect();
    format!("task_{short}")
}

impl TaskRecord {
    #[must_use]
    pub fn new(branch_name: String, estimated_duration: String) -> Self {
        let now = now_rfc3339();
        Self {
            task_id: new_task_id(),
            status: TaskStatus::Initiated,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
            progress_percentage: 0,
            current_step: TaskStatus::Initiated.step_description().to_owned(),
            workflow_steps: Vec::new(),
            branch_name,
            estimated_duration,
            code_changes: Vec::new(),
            test_results: Vec::new(),
            validation_results: Vec::new(),
            pr_url: None,
            commit_hash: None,
            error_message: None,
            error_details: None,
            statistics: BTreeMap::new(),
        }
    }

    /// Moves the record into `status` and refreshes `updated_at`.
    pub fn enter(&mut self, status: TaskStatus) {
        self.status = status;
        self.current_step = status.step_description().to_owned();
        self.touch();
    }

    /// Raises progress, never lowers it.
    pub fn advance_progress(&mut self, pct: u8) {
        self.progress_percentage = self.progress_percentage.max(pct.min(100));
        self.touch();
    }

    /// Appends an in-progress entry to the step log.
    pub fn begin_step(&mut self, name: &str) {
        self.workflow_steps.push(WorkflowStep {
            step_name: name.to_owned(),
            status: "in_progress".to_owned(),
            started_at: now_rfc3339(),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
            started_instant: Some(Instant::now()),
        });
        self.touch();
    }

    pub fn complete_step(&mut self) {
        self.finish_step("completed", None);
    }

    pub fn fail_step(&mut self, error: &str) {
        self.finish_step("failed", Some(error.to_owned()));
    }

    pub fn skip_step(&mut self, reason: &str) {
        self.finish_step("skipped", Some(reason.to_owned()));
    }

    fn finish_step(&mut self, status: &str, error: Option<String>) {
        if let Some(step) = self.workflow_steps.last_mut() {
            step.status = status.to_owned();
            step.completed_at = Some(now_rfc3339());
            step.duration_seconds = step
                .started_instant
                .map(|started| started.elapsed().as_secs_f64());
            step.error_message = error;
        }
        self.touch();
    }

    pub fn fail(&mut self, message: String, details: Option<serde_json::Value>) {
        self.status = TaskStatus::Failed;
        self.current_step = TaskStatus::Failed.step_description().to_owned();
        self.error_message = Some(message);
        self.error_details = details;
        self.completed_at = Some(now_rfc3339());
        self.touch();
    }

    pub fn cancel(&mut self, reason: String) {
        self.status = TaskStatus::Cancelled;
        self.current_step = TaskStatus::Cancelled.step_description().to_owned();
        self.error_message = Some(format!("cancelled: {reason}"));
        self.completed_at = Some(now_rfc3339());
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.current_step = TaskStatus::Completed.step_description().to_owned();
        self.progress_percentage = 100;
        self.completed_at = Some(now_rfc3339());
        self.touch();
    }

    /// Records a step-local fact for later reporting.
    pub fn record_stat(&mut self, key: &str, value: serde_json::Value) {
        self.statistics.insert(key.to_owned(), value);
    }

    fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}

#[must_use]
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique_and_well_formed() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
        assert!(a.starts_with("task_"));
        let suffix = &a["task_".len()..];
        assert!(suffix.len() >= 8);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn forward_order_reaches_completed() {
        let mut status = TaskStatus::Initiated;
        let mut seen = vec![status];
        while let Some(next) = status.next() {
            status = next;
            seen.push(status);
        }
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn progress_table_is_monotone_along_forward_order() {
        let mut status = TaskStatus::Initiated;
        let mut last = status.progress();
        while let Some(next) = status.next() {
            status = next;
            assert!(status.progress() >= last);
            last = status.progress();
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn advance_progress_never_goes_backwards() {
        let mut record = TaskRecord::new("feature-x-abc123".to_owned(), "5-10 minutes".to_owned());
        record.advance_progress(50);
        record.advance_progress(10);
        assert_eq!(record.progress_percentage, 50);
        record.advance_progress(120);
        assert_eq!(record.progress_percentage, 100);
    }

    #[test]
    fn step_log_tracks_completion_and_failure() {
        let mut record = TaskRecord::new("b".to_owned(), "3-5 minutes".to_owned());
        record.begin_step("analyzing");
        record.complete_step();
        record.begin_step("planning");
        record.fail_step("generation failed");

        assert_eq!(record.workflow_steps.len(), 2);
        assert_eq!(record.workflow_steps[0].status, "completed");
        assert!(record.workflow_steps[0].duration_seconds.is_some());
        assert_eq!(record.workflow_steps[1].status, "failed");
        assert_eq!(
            record.workflow_steps[1].error_message.as_deref(),
            Some("generation failed")
        );
    }

    #[test]
    fn failed_record_is_terminal_and_keeps_error() {
        let mut record = TaskRecord::new("b".to_owned(), "3-5 minutes".to_owned());
        record.fail("planning failed: no plan".to_owned(), None);
        assert!(record.status.is_terminal());
        assert!(record.completed_at.is_some());
        assert_eq!(
            record.error_message.as_deref(),
            Some("planning failed: no plan")
        );
    }
}
