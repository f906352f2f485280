// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker sandbox driver.
//!
//! Drives the container engine through the `docker` CLI pointed at the
//! configured engine socket. Sandboxes are labelled with their app and
//! execution ids so a restarted supervisor (and `reap`) can find them
//! without any in-memory state.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vea_core::AppKind;
use vea_store::LogStream;

use super::{ConsoleLine, CreateSpec, Inspection, SandboxDriver, SandboxError, SandboxStatus};

/// Sandbox driver backed by the local container engine.
#[derive(Clone)]
pub struct DockerDriver {
    /// Engine socket, exported as `DOCKER_HOST` on every invocation.
    socket: PathBuf,
    /// Image used to run script and binary artifacts.
    script_image: String,
}

impl DockerDriver {
    pub fn new(socket: impl Into<PathBuf>, script_image: impl Into<String>) -> Self {
        Self { socket: socket.into(), script_image: script_image.into() }
    }

    /// Run a docker CLI command and return stdout on success.
    async fn run(&self, args: &[&str]) -> Result<String, SandboxError> {
        let output = tokio::process::Command::new("docker")
            .args(args)
            .env("DOCKER_HOST", format!("unix://{}", self.socket.display()))
            .output()
            .await
            .map_err(|e| SandboxError::Unavailable(format!("failed to exec docker: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(classify(args.first().copied().unwrap_or(""), stderr))
        }
    }

    fn container_name(spec: &CreateSpec) -> String {
        // Execution ids are uuids; the first group is enough to keep
        // names unique alongside the app id.
        let short = spec.execution_id.as_str().split('-').next().unwrap_or("exec");
        format!("vea-{}-{}", spec.app_id.as_str(), short)
    }

    /// Write the artifact into the app's working directory and return
    /// the in-sandbox entry command.
    fn materialize(spec: &CreateSpec) -> Result<String, SandboxError> {
        std::fs::create_dir_all(&spec.data_path)
            .map_err(|e| SandboxError::ArtifactUnusable(format!("data dir: {e}")))?;

        match spec.kind {
            AppKind::Container => Ok(String::new()),
            AppKind::Script => {
                let (file, runner) = script_entry(&spec.artifact);
                let path = spec.data_path.join(file);
                std::fs::write(&path, &spec.artifact)
                    .map_err(|e| SandboxError::ArtifactUnusable(format!("write {file}: {e}")))?;
                Ok(entry_with_dependencies(&spec.dependencies, runner, file))
            }
            AppKind::Binary => {
                let path = spec.data_path.join("app.bin");
                std::fs::write(&path, spec.artifact.as_bytes())
                    .map_err(|e| SandboxError::ArtifactUnusable(format!("write app.bin: {e}")))?;
                make_executable(&path)
                    .map_err(|e| SandboxError::ArtifactUnusable(format!("chmod app.bin: {e}")))?;
                Ok("/app/app.bin".to_string())
            }
        }
    }
}

#[async_trait]
impl SandboxDriver for DockerDriver {
    async fn create(&self, spec: &CreateSpec) -> Result<String, SandboxError> {
        if spec.artifact.trim().is_empty() {
            return Err(SandboxError::ArtifactUnusable("empty artifact".to_string()));
        }

        let name = Self::container_name(spec);
        let entry = Self::materialize(spec)?;

        let memory = spec.limits.memory_bytes.to_string();
        let cpu_shares = spec.limits.cpu_share.to_string();
        let app_label = format!("vea.app_id={}", spec.app_id);
        let exec_label = format!("vea.execution_id={}", spec.execution_id);
        let mount = format!("{}:/app", spec.data_path.display());

        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            name.clone(),
            "--label".into(),
            app_label,
            "--label".into(),
            exec_label,
            "--memory".into(),
            memory,
            "--cpu-shares".into(),
            cpu_shares,
            "-v".into(),
            mount,
            "-w".into(),
            "/app".into(),
        ];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }

        match spec.kind {
            AppKind::Container => {
                args.push(spec.artifact.clone());
            }
            AppKind::Script | AppKind::Binary => {
                args.push(self.script_image.clone());
                args.push("sh".into());
                args.push("-c".into());
                args.push(entry);
            }
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        info!(app_id = %spec.app_id, execution_id = %spec.execution_id, container = %name, "creating sandbox");
        self.run(&arg_refs).await?;
        Ok(name)
    }

    async fn start(&self, handle: &str) -> Result<(), SandboxError> {
        self.run(&["start", handle]).await.map(|_| ())
    }

    async fn pause(&self, handle: &str) -> Result<(), SandboxError> {
        self.run(&["pause", handle]).await.map(|_| ())
    }

    async fn resume(&self, handle: &str) -> Result<(), SandboxError> {
        self.run(&["unpause", handle]).await.map(|_| ())
    }

    async fn stop(&self, handle: &str, grace: Duration) -> Result<Option<i64>, SandboxError> {
        let timeout = grace.as_secs().max(1).to_string();
        self.run(&["stop", "-t", &timeout, handle]).await?;
        Ok(self.inspect(handle).await.ok().and_then(|i| i.exit_code))
    }

    async fn remove(&self, handle: &str) -> Result<(), SandboxError> {
        self.run(&["rm", handle]).await.map(|_| ())
    }

    async fn inspect(&self, handle: &str) -> Result<Inspection, SandboxError> {
        let out = self
            .run(&[
                "inspect",
                "--format",
                "{{.State.Status}}|{{.State.ExitCode}}|{{.State.StartedAt}}",
                handle,
            ])
            .await?;
        Ok(parse_inspection(&out))
    }

    async fn attach_logs(
        &self,
        handle: &str,
        tx: mpsc::Sender<ConsoleLine>,
        cancel: CancellationToken,
    ) -> Result<(), SandboxError> {
        let mut child = tokio::process::Command::new("docker")
            .args(["logs", "--follow", "--tail", "0", handle])
            .env("DOCKER_HOST", format!("unix://{}", self.socket.display()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| SandboxError::Unavailable(format!("failed to exec docker logs: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SandboxError::Unavailable("docker logs: no stdout pipe".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SandboxError::Unavailable("docker logs: no stderr pipe".to_string())
        })?;

        let handle_owned = handle.to_string();
        tokio::spawn(async move {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut out_open = true;
            let mut err_open = true;

            while out_open || err_open {
                tokio::select! {
                    line = out_lines.next_line(), if out_open => match line {
                        Ok(Some(line)) => {
                            if tx.send(ConsoleLine { stream: LogStream::Out, line }).await.is_err() {
                                break;
                            }
                        }
                        _ => out_open = false,
                    },
                    line = err_lines.next_line(), if err_open => match line {
                        Ok(Some(line)) => {
                            if tx.send(ConsoleLine { stream: LogStream::Err, line }).await.is_err() {
                                break;
                            }
                        }
                        _ => err_open = false,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
            let _ = child.kill().await;
            debug!(container = %handle_owned, "log follower stopped");
        });

        Ok(())
    }

    async fn reap(&self, handle: &str) {
        if let Err(e) = self.run(&["stop", "-t", "1", handle]).await {
            debug!(container = handle, error = %e, "reap: stop");
        }
        if let Err(e) = self.run(&["rm", "-f", handle]).await {
            match e {
                SandboxError::NotFound(_) => {}
                other => warn!(container = handle, error = %other, "reap: remove failed"),
            }
        }
    }
}

/// Map engine stderr onto the driver error contract.
fn classify(op: &str, stderr: String) -> SandboxError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("no such object") {
        return SandboxError::NotFound(stderr);
    }
    if lower.contains("is not running") {
        return SandboxError::NotRunning;
    }
    if lower.contains("is not paused") {
        return SandboxError::NotPaused;
    }
    if lower.contains("is already paused") {
        return SandboxError::AlreadyStarted;
    }
    if lower.contains("cannot remove") && lower.contains("running") {
        return SandboxError::InUse(stderr);
    }
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("connection refused")
    {
        return SandboxError::Unavailable(stderr);
    }
    if op == "create"
        && (lower.contains("no such image")
            || lower.contains("pull access denied")
            || lower.contains("invalid reference format"))
    {
        return SandboxError::ArtifactUnusable(stderr);
    }
    if lower.contains("memory") && lower.contains("minimum") {
        return SandboxError::ResourceDenied(stderr);
    }
    SandboxError::Unavailable(stderr)
}

/// Parse `status|exit_code|started_at` from the inspect format string.
fn parse_inspection(out: &str) -> Inspection {
    let mut parts = out.splitn(3, '|');
    let status = match parts.next().unwrap_or("") {
        "created" => SandboxStatus::Created,
        "running" | "restarting" => SandboxStatus::Running,
        "paused" => SandboxStatus::Paused,
        "exited" | "dead" => SandboxStatus::Exited,
        _ => SandboxStatus::Missing,
    };
    let exit_code = parts.next().and_then(|s| s.parse::<i64>().ok()).filter(|_| {
        // Exit codes only mean something once the sandbox has exited.
        status == SandboxStatus::Exited
    });
    let started_at = parts
        .next()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        // The engine reports year 1 for never-started sandboxes.
        .filter(|dt| dt.timestamp() > 0);
    Inspection { status, exit_code, started_at }
}

/// Pick the entry file and interpreter for a script artifact.
///
/// The runtime image carries both interpreters; the heuristic only has
/// to route plausibly written sources to the right one.
fn script_entry(artifact: &str) -> (&'static str, &'static str) {
    let looks_js = artifact.contains("require(")
        || artifact.contains("module.exports")
        || artifact.contains("=>")
        || artifact.contains("const ")
        || artifact.contains("let ");
    if looks_js {
        ("main.js", "node")
    } else {
        ("main.py", "python3")
    }
}

/// Build the in-sandbox entry command, installing dependencies first.
fn entry_with_dependencies(dependencies: &[String], runner: &str, file: &str) -> String {
    if dependencies.is_empty() {
        return format!("{runner} /app/{file}");
    }
    let deps = dependencies.join(" ");
    let install = if runner == "node" {
        format!("npm install --no-save {deps}")
    } else {
        format!("pip install --no-cache-dir {deps}")
    };
    format!("{install} && {runner} /app/{file}")
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
