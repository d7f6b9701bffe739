//! Runtime Adapter: locate the container engine binary and run commands
//! against it with enforced timeouts.
//!
//! Mirrors the teacher crate's process-execution layer (`execute`,
//! `wait_for_output`) but never treats a non-zero engine exit as a Rust
//! error — the caller always receives a [`CommandResult`] and decides what
//! a given exit code means for that operation, matching the tool's "the
//! core never throws for expected failure" error policy.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::{ContainerError, ContainerResult};

/// Result of a single engine invocation.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Process exit code. `-1` signals a timeout; `1` signals the engine
    /// binary itself could not be found.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandResult {
    /// Whether the engine reported success (`exit_code == 0`).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether this result represents an adapter-level timeout.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.exit_code == -1
    }
}

/// Which container engine was detected on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// `podman`, preferred when both are present.
    Podman,
    /// `docker`.
    Docker,
}

impl EngineKind {
    /// The CLI binary name for this engine (`"podman"` or `"docker"`).
    #[must_use]
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }
}

/// Detects and invokes the host's container engine CLI.
///
/// The detected binary is memoised on first use (`podman` preferred over
/// `docker`) and reused for the lifetime of the adapter, mirroring the
/// teacher's docker-path caching in [`crate::runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeAdapter {
    binary_override: Option<PathBuf>,
    detected: std::sync::Arc<OnceLock<Option<(EngineKind, PathBuf)>>>,
}

impl Default for RuntimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeAdapter {
    /// Create an adapter that auto-detects the engine on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary_override: None,
            detected: std::sync::Arc::new(OnceLock::new()),
        }
    }

    /// Create an adapter pinned to a specific engine binary path, bypassing
    /// auto-detection.
    #[must_use]
    pub fn with_binary_path(path: PathBuf) -> Self {
        let kind = if path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.contains("podman"))
        {
            EngineKind::Podman
        } else {
            EngineKind::Docker
        };
        let cell = OnceLock::new();
        let _ = cell.set(Some((kind, path.clone())));
        Self {
            binary_override: Some(path),
            detected: std::sync::Arc::new(cell),
        }
    }

    fn detect(&self) -> Option<(EngineKind, PathBuf)> {
        self.detected
            .get_or_init(|| {
                if let Some(path) = &self.binary_override {
                    return Some((EngineKind::Docker, path.clone()));
                }
                for kind in [EngineKind::Podman, EngineKind::Docker] {
                    if let Ok(path) = which::which(kind.binary_name()) {
                        return Some((kind, path));
                    }
                }
                None
            })
            .clone()
    }

    /// The engine kind that was detected, if any.
    #[must_use]
    pub fn engine_kind(&self) -> Option<EngineKind> {
        self.detect().map(|(kind, _)| kind)
    }

    /// Run the engine with the given arguments, killing it if `timeout_dur`
    /// elapses. Never returns `Err` for a non-zero engine exit code or for a
    /// missing engine binary — both are represented in the returned
    /// [`CommandResult`] so callers can implement the precondition/timeout
    /// semantics described in the spec without matching on a Rust error.
    pub async fn run(&self, args: &[&str], timeout_dur: Duration) -> CommandResult {
        let Some((_, binary)) = self.detect() else {
            return CommandResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: "No container runtime (docker/podman) found on PATH".to_string(),
            };
        };

        let command_str = format!("{} {}", binary.display(), args.join(" "));
        debug!(command = %command_str, "invoking container runtime");

        let mut command = Command::new(&binary);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, command = %command_str, "failed to spawn runtime");
                return CommandResult {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("failed to spawn {command_str}: {e}"),
                };
            }
        };

        match timeout(timeout_dur, Self::wait_for_output(child)).await {
            Ok(Ok(result)) => {
                if !result.success() {
                    warn!(command = %command_str, exit_code = result.exit_code, "runtime command exited non-zero");
                }
                result
            }
            Ok(Err(e)) => CommandResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("failed waiting on {command_str}: {e}"),
            },
            Err(_) => {
                warn!(command = %command_str, timeout = ?timeout_dur, "runtime command timed out");
                CommandResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("Command timed out after {}s", timeout_dur.as_secs()),
                }
            }
        }
    }

    /// Run the engine and surface a non-zero exit as a [`ContainerError`].
    /// Used by call sites that want `?`-propagation instead of inspecting
    /// `exit_code` themselves (e.g. the preflight checks).
    pub async fn run_checked(
        &self,
        args: &[&str],
        timeout_dur: Duration,
    ) -> ContainerResult<CommandResult> {
        let result = self.run(args, timeout_dur).await;
        if result.timed_out() {
            return Err(ContainerError::timeout(args.join(" "), timeout_dur));
        }
        if !result.success() {
            return Err(ContainerError::engine_failed(
                args.join(" "),
                result.exit_code,
                result.stderr.clone(),
            ));
        }
        Ok(result)
    }

    async fn wait_for_output(mut child: Child) -> std::io::Result<CommandResult> {
        let stdout_handle = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut out = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&line);
                }
                out
            })
        });
        let stderr_handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut out = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&line);
                }
                out
            })
        });

        let status = child.wait().await?;

        let stdout = match stdout_handle {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_handle {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(CommandResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// `engine info` succeeds (daemon reachable).
    pub async fn is_daemon_running(&self) -> bool {
        self.run(&["info", "--format", "json"], Duration::from_secs(10))
            .await
            .success()
    }

    /// `engine ps` succeeds (current user has permission to talk to the
    /// socket; on Linux this is usually a group-membership check).
    pub async fn user_has_permissions(&self) -> bool {
        self.run(&["ps", "-q"], Duration::from_secs(10))
            .await
            .success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_result_success_and_timeout() {
        let ok = CommandResult {
            exit_code: 0,
            stdout: "hi".into(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert!(!ok.timed_out());

        let timed_out = CommandResult {
            exit_code: -1,
            stdout: String::new(),
            stderr: "Command timed out after 5s".into(),
        };
        assert!(timed_out.timed_out());
        assert!(!timed_out.success());
    }

    #[tokio::test]
    async fn run_reports_missing_runtime_without_erroring() {
        let adapter = RuntimeAdapter::with_binary_path(PathBuf::from(
            "/definitely/not/a/real/container-engine-binary",
        ));
        let result = adapter.run(&["--version"], Duration::from_secs(2)).await;
        assert_eq!(result.exit_code, 1);
        assert!(!result.success());
    }

    #[tokio::test]
    #[ignore = "Requires Docker daemon running"]
    async fn daemon_probe_integration() {
        let adapter = RuntimeAdapter::new();
        let running = adapter.is_daemon_running().await;
        println!("daemon running: {running}");
    }
}
