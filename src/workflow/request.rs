#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::core::complexity::{self, Complexity};
use crate::error::CodeforgeError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A natural-language coding request accepted by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingRequest {
    pub requirements: String,
    #[serde(default)]
    pub priority: Priority,
    pub target_service: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub skip_tests: bool,
}

fn default_base_branch() -> String {
    "main".to_owned()
}

/// Verbs that carry no implementable content on their own.
const VAGUE_INDICATORS: &[&str] = &[
    "make", "better", "improve", "faster", "optimize", "fix", "enhance", "update", "modify",
];

impl CodingRequest {
    #[must_use]
    pub fn new(requirements: impl Into<String>, target_service: impl Into<String>) -> Self {
        Self {
            requirements: requirements.into(),
            priority: Priority::Medium,
            target_service: target_service.into(),
            context: None,
            base_branch: default_base_branch(),
            skip_tests: false,
        }
    }

    /// Semantic checks applied before a task record is created.
    pub fn validate(&self) -> Result<(), CodeforgeError> {
        let requirements = self.requirements.trim();

        if requirements.len() < 10 {
            return Err(CodeforgeError::Validation(
                "requirements must be at least 10 characters".to_owned(),
            ));
        }
        if requirements.len() > 2000 {
            return Err(CodeforgeError::Validation(
                "requirements must be at most 2000 characters".to_owned(),
            ));
        }

        let words: Vec<String> = requirements
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if words.len() < 5 {
            return Err(CodeforgeError::Validation(
                "requirements must be more specific (at least 5 words)".to_owned(),
            ));
        }

        // Reject requests composed entirely of vague verbs.
        let significant: Vec<&String> = words.iter().filter(|w| w.len() > 3).collect();
        if !significant.is_empty()
            && significant
                .iter()
                .all(|w| VAGUE_INDICATORS.contains(&w.as_str()))
        {
            return Err(CodeforgeError::Validation(
                "requirements are too vague; specify what exactly needs to be implemented"
                    .to_owned(),
            ));
        }

        if let Some(context) = &self.context
            && context.trim().len() < 10
        {
            return Err(CodeforgeError::Validation(
                "context should be meaningful if provided".to_owned(),
            ));
        }

        if self.base_branch.is_empty()
            || !self
                .base_branch
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
        {
            return Err(CodeforgeError::Validation(format!(
                "invalid base branch name '{}'",
                self.base_branch
            )));
        }

        Ok(())
    }

    /// Coarse wall-clock estimate shown on the initial snapshot.
    #[must_use]
    pub fn estimated_duration(&self) -> String {
        match complexity::estimate(&self.requirements) {
            Complexity::Low => "3-5 minutes".to_owned(),
            Complexity::Medium => "5-10 minutes".to_owned(),
            Complexity::High => "10-20 minutes".to_owned(),
        }
    }
}
