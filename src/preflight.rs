//! Preflight diagnostics: capability checks run before `create` is allowed
//! to proceed, each returning a structured result instead of a bare bool so
//! the caller can render actionable guidance.

use std::time::Duration;

use serde::Serialize;

use crate::runtime::RuntimeAdapter;

/// Outcome of a single preflight capability check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Short check name, e.g. `"engine_found"`.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Human-readable remediation, present when `passed` is `false`.
    pub guidance: Option<String>,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            guidance: None,
        }
    }

    fn fail(name: &str, guidance: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            guidance: Some(guidance.into()),
        }
    }
}

/// Full preflight report: one [`CheckResult`] per probe, plus a convenience
/// `ready` flag that is `true` only when every check passed.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Individual check outcomes, in probe order.
    pub checks: Vec<CheckResult>,
    /// Whether `create` may proceed.
    pub ready: bool,
}

/// Run every preflight probe. The five probes are independent reads against
/// the runtime adapter, so they run concurrently (§5's "a preflight need not
/// serialise its five probes") rather than one after another.
pub async fn run(runtime: &RuntimeAdapter, probe_timeout: Duration) -> PreflightReport {
    let engine_check = async {
        match runtime.engine_kind() {
            Some(_) => CheckResult::pass("engine_found"),
            None => CheckResult::fail(
                "engine_found",
                "Neither docker nor podman was found on PATH. Install one of them and retry.",
            ),
        }
    };

    let daemon_check = async {
        if runtime.engine_kind().is_none() {
            return CheckResult::fail("daemon_running", "No engine detected; skipped.");
        }
        if runtime.is_daemon_running().await {
            CheckResult::pass("daemon_running")
        } else {
            CheckResult::fail(
                "daemon_running",
                "The container daemon is not reachable. Start Docker Desktop or the podman \
                 machine and retry.",
            )
        }
    };

    let permission_check = async {
        if runtime.engine_kind().is_none() {
            return CheckResult::fail("user_has_permissions", "No engine detected; skipped.");
        }
        if runtime.user_has_permissions().await {
            CheckResult::pass("user_has_permissions")
        } else {
            CheckResult::fail(
                "user_has_permissions",
                "Current user cannot talk to the engine socket. On Linux, add the user to the \
                 docker group and re-login (`sudo usermod -aG docker $USER`).",
            )
        }
    };

    let compose_check = async {
        let result = runtime.run(&["compose", "version"], probe_timeout).await;
        if result.success() {
            CheckResult::pass("compose_available")
        } else {
            CheckResult::fail(
                "compose_available",
                "`compose` subcommand unavailable; multi-service create requests will fail.",
            )
        }
    };

    let disk_check = async {
        let result = runtime.run(&["system", "df", "--format", "json"], probe_timeout).await;
        if result.success() {
            CheckResult::pass("disk_accessible")
        } else {
            CheckResult::fail(
                "disk_accessible",
                "Could not query engine disk usage; image pulls may fail if storage is full.",
            )
        }
    };

    let (engine, daemon, permissions, compose, disk) =
        tokio::join!(engine_check, daemon_check, permission_check, compose_check, disk_check);

    let checks = vec![engine, daemon, permissions, compose, disk];
    // `create` is only blocked by the hard preconditions; compose/disk are
    // advisory (not every purpose needs compose, and disk pressure is a
    // soft warning, not a precondition failure).
    let ready = checks
        .iter()
        .take(3)
        .all(|c| c.passed);

    PreflightReport { checks, ready }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_runtime_fails_every_hard_check() {
        let runtime = RuntimeAdapter::with_binary_path(PathBuf::from(
            "/definitely/not/a/real/container-engine-binary",
        ));
        let report = run(&runtime, Duration::from_secs(2)).await;
        assert!(!report.ready);
        let engine_check = report.checks.iter().find(|c| c.name == "engine_found");
        // with_binary_path always reports a detected engine kind (it never
        // probes PATH), so the first failure surfaces at the daemon check.
        assert!(engine_check.is_some());
        assert!(!report
            .checks
            .iter()
            .find(|c| c.name == "daemon_running")
            .unwrap()
            .passed);
    }

    #[tokio::test]
    #[ignore = "Requires Docker daemon running"]
    async fn preflight_against_live_daemon() {
        let runtime = RuntimeAdapter::new();
        let report = run(&runtime, Duration::from_secs(10)).await;
        println!("{report:#?}");
    }
}
