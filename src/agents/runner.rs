#![forbid(unsafe_code)]

//! Default [`CodingAgents`] backed by an external runner binary
//! (an LLM CLI that reads a prompt on stdin and writes its answer to
//! stdout).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::agents::{CodingAgents, ImplementationPlan, PlannedFile};
use crate::core::analysis::RepositoryAnalysis;
use crate::error::CodeforgeError;
use crate::workflow::request::CodingRequest;

pub struct RunnerAgents {
    executable: String,
    args: Vec<String>,
    timeout: Duration,
}

impl RunnerAgents {
    #[must_use]
    pub fn new(executable: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args,
            timeout,
        }
    }

    async fn run_prompt(&self, prompt: &str) -> Result<String, CodeforgeError> {
        debug!(exe = %self.executable, bytes = prompt.len(), "invoking runner");
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| CodeforgeError::collaborator("runner", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut buf = prompt.as_bytes().to_vec();
            buf.push(b'\n');
            stdin
                .write_all(&buf)
                .await
                .map_err(|e| CodeforgeError::collaborator("runner", e))?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| CodeforgeError::collaborator("runner", e))?,
            Err(_) => {
                return Err(CodeforgeError::collaborator(
                    "runner",
                    format!("runner timed out after {:?}", self.timeout),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodeforgeError::collaborator(
                "runner",
                format!("runner exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Pulls the first fenced `json` block out of runner output, falling
/// back to the outermost brace pair.
#[must_use]
pub fn extract_json(output: &str) -> Option<&str> {
    if let Some(start) = output.find("```json") {
        let rest = &output[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end > start {
        Some(output[start..=end].trim())
    } else {
        None
    }
}

/// Pulls the first fenced code block (any language tag), falling back
/// to the whole output.
#[must_use]
pub fn extract_code(output: &str) -> String {
    if let Some(start) = output.find("```") {
        let rest = &output[start + 3..];
        let body_start = rest.find('\n').map_or(0, |i| i + 1);
        if let Some(end) = rest[body_start..].find("```") {
            return rest[body_start..body_start + end].trim_end().to_owned();
        }
    }
    output.trim().to_owned()
}

fn parse_json<T: serde::de::DeserializeOwned>(
    output: &str,
    what: &str,
) -> Result<T, CodeforgeError> {
    let raw = extract_json(output).ok_or_else(|| {
        CodeforgeError::collaborator("runner", format!("no JSON found in {what} output"))
    })?;
    serde_json::from_str(raw)
        .map_err(|e| CodeforgeError::collaborator("runner", format!("invalid {what} JSON: {e}")))
}

fn request_header(request: &CodingRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Requirements: {}", request.requirements.trim());
    if let Some(context) = &request.context {
        let _ = writeln!(out, "Context: {}", context.trim());
    }
    let _ = writeln!(out, "Target service: {}", request.target_service);
    out
}

#[async_trait]
impl CodingAgents for RunnerAgents {
    async fn plan(
        &self,
        request: &CodingRequest,
        analysis: &RepositoryAnalysis,
    ) -> Result<ImplementationPlan, CodeforgeError> {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "You are planning a code change. Respond with a single JSON object \
             with keys: analysis {{summary, complexity (low|medium|high), tasks}}, \
             design {{approach, components, endpoints}}, files_to_create, \
             files_to_modify (lists of {{path, changes}}), test_strategy, risks."
        );
        let _ = writeln!(prompt);
        prompt.push_str(&request_header(request));
        if analysis.total_files > 0 {
            let _ = writeln!(prompt, "Repository: {}", analysis.summary());
        }

        let output = self.run_prompt(&prompt).await?;
        parse_json(&output, "plan")
    }

    async fn generate_code(
        &self,
        request: &CodingRequest,
        analysis: &RepositoryAnalysis,
        plan: &ImplementationPlan,
        file: &PlannedFile,
    ) -> Result<String, CodeforgeError> {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Write the complete content of the file `{}`. Respond with one \
             fenced code block and nothing else.",
            file.path
        );
        let _ = writeln!(prompt);
        prompt.push_str(&request_header(request));
        if analysis.total_files > 0 {
            let _ = writeln!(prompt, "Repository: {}", analysis.summary());
        }
        if !plan.design.approach.is_empty() {
            let _ = writeln!(prompt, "Approach: {}", plan.design.approach);
        }
        if !file.changes.is_empty() {
            let _ = writeln!(prompt, "Planned changes: {}", file.changes);
        }

        let output = self.run_prompt(&prompt).await?;
        let code = extract_code(&output);
        if code.is_empty() {
            return Err(CodeforgeError::collaborator(
                "runner",
                format!("empty generation for {}", file.path),
            ));
        }
        Ok(code)
    }

    async fn generate_tests(
        &self,
        request: &CodingRequest,
        analysis: &RepositoryAnalysis,
        plan: &ImplementationPlan,
        generated: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, CodeforgeError> {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Write tests for the change below. Respond with a single JSON \
             object mapping test file paths to their full contents."
        );
        let _ = writeln!(prompt);
        prompt.push_str(&request_header(request));
        if analysis.total_files > 0 {
            let _ = writeln!(prompt, "Repository: {}", analysis.summary());
        }
        if !plan.test_strategy.is_empty() {
            let _ = writeln!(prompt, "Test strategy: {}", plan.test_strategy);
        }
        let _ = writeln!(prompt, "Files changed:");
        for path in generated.keys() {
            let _ = writeln!(prompt, "- {path}");
        }

        let output = self.run_prompt(&prompt).await?;
        parse_json(&output, "tests")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let output = "Here is the plan:\n```json\n{\"test_strategy\": \"pytest\"}\n```\ndone";
        assert_eq!(
            extract_json(output),
            Some("{\"test_strategy\": \"pytest\"}")
        );
    }

    #[test]
    fn extracts_bare_json_by_braces() {
        let output = "noise {\"a\": 1} trailing";
        assert_eq!(extract_json(output), Some("{\"a\": 1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn extracts_code_block_with_language_tag() {
        let output = "```python\ndef f():\n    return 1\n```";
        assert_eq!(extract_code(output), "def f():\n    return 1");
    }

    #[test]
    fn falls_back_to_whole_output_without_fence() {
        assert_eq!(extract_code("  plain text  "), "plain text");
    }

    #[test]
    fn plan_json_parses_with_defaults() {
        let raw = "```json\n{\"analysis\": {\"summary\": \"s\", \"complexity\": \"high\"}, \
                   \"files_to_create\": [{\"path\": \"src/api.py\"}]}\n```";
        let plan: ImplementationPlan = parse_json(raw, "plan").expect("plan");
        assert_eq!(plan.analysis.summary, "s");
        assert_eq!(plan.files_to_create.len(), 1);
        assert_eq!(plan.files_to_create[0].path, "src/api.py");
        assert!(plan.files_to_modify.is_empty());
    }
}
