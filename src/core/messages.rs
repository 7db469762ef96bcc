#![forbid(unsafe_code)]

//! Generated commit messages and pull-request descriptions.

use std::fmt::Write as _;

use crate::agents::ImplementationPlan;
use crate::workflow::task::TestResult;

const SUMMARY_LIMIT: usize = 50;
const COMMIT_FILE_LIMIT: usize = 5;

/// `feat:` summary line plus a bullet list of changed files.
#[must_use]
pub fn commit_message(requirements: &str, files_changed: &[String]) -> String {
    let requirements = requirements.trim();
    let summary = if requirements.len() > SUMMARY_LIMIT {
        let truncated: String = requirements.chars().take(SUMMARY_LIMIT).collect();
        format!("feat: {}...", truncated.trim_end())
    } else {
        format!("feat: {requirements}")
    };

    let mut body = String::new();
    if !files_changed.is_empty() {
        let _ = writeln!(body, "- Modified {} file(s):", files_changed.len());
        for file in files_changed.iter().take(COMMIT_FILE_LIMIT) {
            let _ = writeln!(body, "  - {file}");
        }
        if files_changed.len() > COMMIT_FILE_LIMIT {
            let _ = writeln!(
                body,
                "  - ... and {} more files",
                files_changed.len() - COMMIT_FILE_LIMIT
            );
        }
    }

    if body.is_empty() {
        summary
    } else {
        format!("{summary}\n\n{}", body.trim_end())
    }
}

/// Pull-request body: requirements block, implementation summary,
/// files-changed list and a test summary.
#[must_use]
pub fn pr_description(
    requirements: &str,
    plan: Option<&ImplementationPlan>,
    files_changed: &[String],
    test_results: &[TestResult],
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## Automated Implementation\n");
    let _ = writeln!(out, "### Requirements");
    let _ = writeln!(out, "```\n{}\n```\n", requirements.trim());

    let _ = writeln!(out, "### Implementation Summary");
    if let Some(plan) = plan {
        let _ = writeln!(out, "- **Complexity**: {}", plan.analysis.complexity);
        if !plan.analysis.tasks.is_empty() {
            let _ = writeln!(out, "- **Tasks**: {} identified", plan.analysis.tasks.len());
        }
        if !plan.design.approach.is_empty() {
            let _ = writeln!(out, "- **Approach**: {}", plan.design.approach);
        }
    }
    let _ = writeln!(out, "- **Files Modified**: {}\n", files_changed.len());

    let _ = writeln!(out, "### Files Changed");
    for file in files_changed {
        let _ = writeln!(out, "- `{file}`");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "### Testing");
    if test_results.is_empty() {
        let _ = writeln!(out, "- Test suite generated (execution pending)");
    } else {
        let passed = test_results.iter().filter(|t| t.status == "passed").count();
        let failed = test_results.iter().filter(|t| t.status == "failed").count();
        let _ = writeln!(out, "- {passed} tests passed");
        if failed > 0 {
            let _ = writeln!(out, "- {failed} tests failed");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "---");
    let _ = writeln!(out, "*Generated implementation; review before merging.*");

    out
}
