#![forbid(unsafe_code)]

//! Isolated test environments.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CodeforgeError;
use crate::workflow::task::{TestResult, now_rfc3339};

pub mod docker;

/// Lifecycle of a single test environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Creating,
    Ready,
    InstallingDeps,
    StartingService,
    ServiceRunning,
    RunningTests,
    Failed,
    CleanedUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxEnvironment {
    pub env_id: String,
    pub task_id: String,
    pub container_name: String,
    pub status: EnvironmentStatus,
    pub created_at: String,
}

impl SandboxEnvironment {
    #[must_use]
    pub fn new(env_id: String, task_id: String, container_name: String) -> Self {
        Self {
            env_id,
            task_id,
            container_name,
            status: EnvironmentStatus::Creating,
            created_at: now_rfc3339(),
        }
    }
}

/// Outcome of a test run inside a sandbox.
///
/// Failing tests are a result, not an error; `Err` from
/// [`Sandbox::run_tests`] means the sandbox itself broke.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub coverage_percent: Option<f64>,
    pub success: bool,
    #[serde(default)]
    pub details: Vec<TestResult>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Provisions an environment seeded with the workspace contents.
    async fn create_environment(
        &self,
        task_id: &str,
        workspace: &Path,
    ) -> Result<SandboxEnvironment, CodeforgeError>;

    async fn install_dependencies(
        &self,
        env: &mut SandboxEnvironment,
    ) -> Result<(), CodeforgeError>;

    async fn start_service(&self, env: &mut SandboxEnvironment) -> Result<(), CodeforgeError>;

    async fn run_tests(
        &self,
        env: &mut SandboxEnvironment,
    ) -> Result<TestReport, CodeforgeError>;

    /// Tears the environment down. Must be safe to call in any state.
    async fn cleanup(&self, env: &mut SandboxEnvironment) -> Result<(), CodeforgeError>;
}
