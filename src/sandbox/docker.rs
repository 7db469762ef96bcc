#![forbid(unsafe_code)]

//! Docker-backed [`Sandbox`] using the `docker` CLI.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CodeforgeError;
use crate::sandbox::{EnvironmentStatus, Sandbox, SandboxEnvironment, TestReport};

const CONTAINER_PREFIX: &str = "codeforge-test-";
const WORKDIR: &str = "/app";

#[derive(Debug, Clone)]
pub struct DockerSandbox {
    executable: String,
    image: String,
    network_mode: String,
    command_timeout: Duration,
    test_timeout: Duration,
}

impl DockerSandbox {
    #[must_use]
    pub fn new(
        executable: impl Into<String>,
        image: impl Into<String>,
        network_mode: impl Into<String>,
        command_timeout: Duration,
        test_timeout: Duration,
    ) -> Self {
        Self {
            executable: executable.into(),
            image: image.into(),
            network_mode: network_mode.into(),
            command_timeout,
            test_timeout,
        }
    }

    async fn docker(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, CodeforgeError> {
        debug!(?args, "docker");
        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| CodeforgeError::collaborator("sandbox", e))?;
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| CodeforgeError::collaborator("sandbox", e)),
            Err(_) => Err(CodeforgeError::collaborator(
                "sandbox",
                format!("docker {} timed out after {timeout:?}", args.join(" ")),
            )),
        }
    }

    async fn docker_ok(&self, args: &[&str], timeout: Duration) -> Result<String, CodeforgeError> {
        let output = self.docker(args, timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodeforgeError::collaborator(
                "sandbox",
                format!("docker {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    /// Removes leftover task containers from earlier runs.
    pub async fn force_cleanup_stale(&self) -> Result<usize, CodeforgeError> {
        let filter = format!("name={CONTAINER_PREFIX}");
        let listed = self
            .docker_ok(
                &["ps", "-aq", "--filter", &filter],
                self.command_timeout,
            )
            .await?;
        let ids: Vec<&str> = listed.lines().filter(|l| !l.is_empty()).collect();
        for id in &ids {
            if let Err(e) = self.docker_ok(&["rm", "-f", id], self.command_timeout).await {
                warn!(container = %id, error = %e, "stale container removal failed");
            }
        }
        Ok(ids.len())
    }

    async fn exec(
        &self,
        env: &SandboxEnvironment,
        shell_cmd: &str,
        timeout: Duration,
    ) -> Result<std::process::Output, CodeforgeError> {
        self.docker(
            &[
                "exec",
                "-w",
                WORKDIR,
                &env.container_name,
                "sh",
                "-c",
                shell_cmd,
            ],
            timeout,
        )
        .await
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn create_environment(
        &self,
        task_id: &str,
        workspace: &Path,
    ) -> Result<SandboxEnvironment, CodeforgeError> {
        let env_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let container_name = format!("{CONTAINER_PREFIX}{env_id}");
        let mut env = SandboxEnvironment::new(env_id, task_id.to_owned(), container_name.clone());

        self.docker_ok(
            &[
                "run",
                "-d",
                "--name",
                &container_name,
                "--network",
                &self.network_mode,
                &self.image,
                "tail",
                "-f",
                "/dev/null",
            ],
            self.command_timeout,
        )
        .await?;

        // Seed the container with the workspace tree.
        let src = format!("{}/.", workspace.to_string_lossy());
        let dest = format!("{container_name}:{WORKDIR}");
        self.docker_ok(&["cp", &src, &dest], self.command_timeout)
            .await?;

        env.status = EnvironmentStatus::Ready;
        Ok(env)
    }

    async fn install_dependencies(
        &self,
        env: &mut SandboxEnvironment,
    ) -> Result<(), CodeforgeError> {
        env.status = EnvironmentStatus::InstallingDeps;
        let output = self
            .exec(
                env,
                "if [ -f requirements.txt ]; then pip install -q -r requirements.txt; fi; \
                 pip install -q pytest",
                self.command_timeout,
            )
            .await?;
        if !output.status.success() {
            env.status = EnvironmentStatus::Failed;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodeforgeError::collaborator(
                "sandbox",
                format!("dependency install failed: {}", stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn start_service(&self, env: &mut SandboxEnvironment) -> Result<(), CodeforgeError> {
        env.status = EnvironmentStatus::StartingService;
        // Best effort; tests that need a live service start it themselves.
        let output = self
            .exec(
                env,
                "if [ -f main.py ]; then nohup python main.py >/tmp/service.log 2>&1 & fi",
                self.command_timeout,
            )
            .await?;
        if output.status.success() {
            env.status = EnvironmentStatus::ServiceRunning;
        } else {
            warn!(container = %env.container_name, "service start failed; continuing");
            env.status = EnvironmentStatus::Ready;
        }
        Ok(())
    }

    async fn run_tests(&self, env: &mut SandboxEnvironment) -> Result<TestReport, CodeforgeError> {
        env.status = EnvironmentStatus::RunningTests;
        let output = self
            .exec(env, "python -m pytest -q --tb=short", self.test_timeout)
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let (passed, failed, skipped) = parse_pytest_summary(&stdout);

        let mut report = TestReport {
            passed,
            failed,
            skipped,
            total: passed + failed + skipped,
            coverage_percent: None,
            success: output.status.success(),
            details: Vec::new(),
            error_message: None,
        };
        if !report.success && report.total == 0 {
            // pytest did not even produce a summary line.
            report.error_message = Some(format!("test run failed: {}", stderr.trim()));
        }
        Ok(report)
    }

    async fn cleanup(&self, env: &mut SandboxEnvironment) -> Result<(), CodeforgeError> {
        let output = self
            .docker(&["rm", "-f", &env.container_name], self.command_timeout)
            .await;
        match output {
            Ok(out) if out.status.success() => {
                env.status = EnvironmentStatus::CleanedUp;
                Ok(())
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(container = %env.container_name, error = %stderr.trim(), "cleanup failed");
                env.status = EnvironmentStatus::CleanedUp;
                Ok(())
            }
            Err(e) => {
                warn!(container = %env.container_name, error = %e, "cleanup failed");
                env.status = EnvironmentStatus::CleanedUp;
                Ok(())
            }
        }
    }
}

/// Reads pytest's trailing summary line, e.g. `3 passed, 1 failed in 0.2s`.
fn parse_pytest_summary(output: &str) -> (usize, usize, usize) {
    let Ok(re) = Regex::new(r"(\d+)\s+(passed|failed|skipped|error)") else {
        return (0, 0, 0);
    };
    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for line in output.lines().rev().take(10) {
        for caps in re.captures_iter(line) {
            let count: usize = caps[1].parse().unwrap_or(0);
            match &caps[2] {
                "passed" => passed = count,
                "failed" | "error" => failed += count,
                "skipped" => skipped = count,
                _ => {}
            }
        }
        if passed + failed + skipped > 0 {
            break;
        }
    }
    (passed, failed, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_summary() {
        let out = "....F.s\n======= 5 passed, 1 failed, 1 skipped in 0.31s =======\n";
        assert_eq!(parse_pytest_summary(out), (5, 1, 1));
    }

    #[test]
    fn parses_all_passed() {
        let out = "=== 12 passed in 1.02s ===\n";
        assert_eq!(parse_pytest_summary(out), (12, 0, 0));
    }

    #[test]
    fn no_summary_yields_zeroes() {
        assert_eq!(parse_pytest_summary("boom"), (0, 0, 0));
    }
}
