#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::agents::ImplementationPlan;
use crate::core::analysis::RepositoryAnalysis;
use crate::workflow::request::CodingRequest;

/// Mutable state threaded through one task's step handlers.
///
/// Lives only inside the spawned workflow; everything observable from
/// outside goes into the task record instead.
pub struct WorkflowContext {
    pub request: CodingRequest,
    pub task_id: String,
    pub feature_name: String,
    pub branch_name: String,
    pub repo_url: String,
    pub workspace: Option<PathBuf>,
    pub analysis: RepositoryAnalysis,
    pub plan: Option<ImplementationPlan>,
    /// Relative path -> generated content, tests included.
    pub generated_files: BTreeMap<String, String>,
    pub started: Instant,
}

impl WorkflowContext {
    #[must_use]
    pub fn new(
        request: CodingRequest,
        task_id: String,
        feature_name: String,
        branch_name: String,
        repo_url: String,
    ) -> Self {
        Self {
            request,
            task_id,
            feature_name,
            branch_name,
            repo_url,
            workspace: None,
            analysis: RepositoryAnalysis::empty(),
            plan: None,
            generated_files: BTreeMap::new(),
            started: Instant::now(),
        }
    }
}
