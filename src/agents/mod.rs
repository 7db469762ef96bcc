#![forbid(unsafe_code)]

//! Planning and code generation collaborators.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::analysis::RepositoryAnalysis;
use crate::core::complexity::Complexity;
use crate::error::CodeforgeError;
use crate::workflow::request::CodingRequest;

pub mod runner;

/// A file the plan wants created or changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    #[serde(default)]
    pub changes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDesign {
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// Structured output of the planning step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationPlan {
    #[serde(default)]
    pub analysis: PlanAnalysis,
    #[serde(default)]
    pub design: PlanDesign,
    #[serde(default)]
    pub files_to_create: Vec<PlannedFile>,
    #[serde(default)]
    pub files_to_modify: Vec<PlannedFile>,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl ImplementationPlan {
    /// All files the plan touches, creations first.
    #[must_use]
    pub fn planned_files(&self) -> Vec<&PlannedFile> {
        self.files_to_create
            .iter()
            .chain(self.files_to_modify.iter())
            .collect()
    }
}

/// Code-producing collaborator behind the analysis, planning, coding
/// and test-generation steps.
#[async_trait]
pub trait CodingAgents: Send + Sync {
    /// Turns a request plus repository context into a plan.
    async fn plan(
        &self,
        request: &CodingRequest,
        analysis: &RepositoryAnalysis,
    ) -> Result<ImplementationPlan, CodeforgeError>;

    /// Produces the content for one planned file. `analysis` carries
    /// the structure scan of the checked-out repository.
    async fn generate_code(
        &self,
        request: &CodingRequest,
        analysis: &RepositoryAnalysis,
        plan: &ImplementationPlan,
        file: &PlannedFile,
    ) -> Result<String, CodeforgeError>;

    /// Produces test files (path -> content) for the generated code.
    async fn generate_tests(
        &self,
        request: &CodingRequest,
        analysis: &RepositoryAnalysis,
        plan: &ImplementationPlan,
        generated: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, CodeforgeError>;
}
