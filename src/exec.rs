//! Execution Surface: foreground exec, interactive-shell hints, and the
//! background-job triplet (`.pid`/`.out`/`.exit`) that survives an
//! individual poll's process lifetime.

use std::time::Duration;

use tracing::{debug, warn};

use crate::runtime::{CommandResult, EngineKind, RuntimeAdapter};
use crate::types::{BackgroundJobHandle, BackgroundJobStatus, HealthWaitResult};
use crate::utils::random_hex;

const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

fn user_args<'a>(exec_user: Option<&'a str>, as_root: bool) -> Vec<&'a str> {
    if as_root {
        Vec::new()
    } else if let Some(user) = exec_user {
        vec!["--user", user]
    } else {
        Vec::new()
    }
}

/// Run `command` inside `container` via `sh -c`, as `exec_user` unless
/// `as_root` is set.
pub async fn exec(
    runtime: &RuntimeAdapter,
    container: &str,
    command: &str,
    exec_user: Option<&str>,
    as_root: bool,
    timeout: Option<Duration>,
) -> CommandResult {
    let mut args = vec!["exec"];
    args.extend(user_args(exec_user, as_root));
    args.push(container);
    args.push("sh");
    args.push("-c");
    args.push(command);
    runtime.run(&args, timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT)).await
}

/// Probe `/bin/bash` -> `/bin/zsh` -> `/bin/sh` via `test -x` (first hit
/// wins) and return the shell command a human would type to get an
/// interactive session, `--user` included when applicable.
pub async fn exec_interactive_hint(
    runtime: &RuntimeAdapter,
    container: &str,
    exec_user: Option<&str>,
    as_root: bool,
    probe_timeout: Duration,
) -> String {
    let mut shell = "/bin/sh";
    for candidate in ["/bin/bash", "/bin/zsh", "/bin/sh"] {
        let probe = format!("test -x {candidate}");
        if exec(runtime, container, &probe, None, true, Some(probe_timeout))
            .await
            .success()
        {
            shell = candidate;
            break;
        }
    }

    let user_flag = if as_root {
        String::new()
    } else if let Some(user) = exec_user {
        format!(" --user {user}")
    } else {
        String::new()
    };

    let engine_bin = runtime.engine_kind().map_or("docker", EngineKind::binary_name);
    format!("{engine_bin} exec -it{user_flag} {container} {shell}")
}

/// Launch `command` as a detached background job, returning a handle to its
/// `.pid`/`.out`/`.exit` triplet under `/tmp/amp-job-<id>`.
pub async fn exec_background(
    runtime: &RuntimeAdapter,
    container: &str,
    command: &str,
    exec_user: Option<&str>,
    as_root: bool,
    launch_timeout: Duration,
) -> Result<BackgroundJobHandle, CommandResult> {
    let job_id = random_hex(8);
    let prefix = format!("/tmp/amp-job-{job_id}");
    let escaped = command.replace('\'', "'\\''");
    let launcher = format!(
        "sh -c '{escaped}'; echo $? > {prefix}.exit"
    );
    let script = format!(
        "( {launcher} ) > {prefix}.out 2>&1 & echo $! > {prefix}.pid; cat {prefix}.pid"
    );

    let result = exec(runtime, container, &script, exec_user, as_root, Some(launch_timeout)).await;
    if !result.success() {
        warn!(container, job_id, stderr = %result.stderr, "failed to launch background job");
        return Err(result);
    }

    let launcher_pid: u32 = result.stdout.trim().parse().unwrap_or(0);
    debug!(container, job_id, launcher_pid, "background job launched");
    Ok(BackgroundJobHandle {
        job_id,
        container: container.to_string(),
        launcher_pid,
    })
}

/// Poll a background job. `.exit` existing wins regardless of PID liveness
/// (PIDs may be recycled in minimal containers). Always returns the last
/// 100 lines of `.out`.
pub async fn exec_poll(
    runtime: &RuntimeAdapter,
    handle: &BackgroundJobHandle,
    probe_timeout: Duration,
) -> BackgroundJobStatus {
    let prefix = handle.path_prefix();
    let script = format!(
        "if [ -f {prefix}.exit ]; then \
           echo DONE; cat {prefix}.exit; \
         else \
           if kill -0 {pid} 2>/dev/null; then echo ALIVE; else echo GONE; fi; \
         fi; \
         echo ---OUTPUT---; \
         tail -n 100 {prefix}.out 2>/dev/null",
        pid = handle.launcher_pid
    );

    let result = exec(runtime, &handle.container, &script, None, true, Some(probe_timeout)).await;
    parse_poll_output(&result.stdout)
}

fn parse_poll_output(stdout: &str) -> BackgroundJobStatus {
    let Some((header, output)) = stdout.split_once("---OUTPUT---") else {
        return BackgroundJobStatus {
            running: true,
            exit_code: None,
            output_tail: String::new(),
        };
    };
    let output_tail = output.trim_start_matches('\n').to_string();
    let mut lines = header.lines();
    match lines.next().map(str::trim) {
        Some("DONE") => {
            let exit_code = lines.next().and_then(|l| l.trim().parse().ok());
            BackgroundJobStatus {
                running: false,
                exit_code,
                output_tail,
            }
        }
        Some("GONE") => BackgroundJobStatus {
            running: false,
            exit_code: None,
            output_tail,
        },
        _ => BackgroundJobStatus {
            running: true,
            exit_code: None,
            output_tail,
        },
    }
}

/// `kill $(cat .pid)`, best-effort.
pub async fn exec_cancel(
    runtime: &RuntimeAdapter,
    handle: &BackgroundJobHandle,
    probe_timeout: Duration,
) -> bool {
    let script = format!("kill {} 2>/dev/null; true", handle.launcher_pid);
    exec(runtime, &handle.container, &script, None, true, Some(probe_timeout))
        .await
        .success()
}

/// Poll `health_command` up to `retries` times, `interval` apart, with a
/// per-attempt engine timeout of `interval + 5s` so a hung probe can't
/// outlive a single attempt.
pub async fn wait_healthy(
    runtime: &RuntimeAdapter,
    container: &str,
    health_command: &str,
    retries: u32,
    interval: Duration,
) -> HealthWaitResult {
    let per_attempt_timeout = interval + Duration::from_secs(5);
    let mut last_error = None;

    for attempt in 1..=retries.max(1) {
        let result = exec(runtime, container, health_command, None, true, Some(per_attempt_timeout)).await;
        if result.success() {
            return HealthWaitResult {
                healthy: true,
                attempts: attempt,
                detail: format!("health command succeeded on attempt {attempt}"),
                last_error: None,
            };
        }
        last_error = Some(if result.timed_out() {
            format!("attempt {attempt} timed out")
        } else {
            format!("attempt {attempt} exited {}: {}", result.exit_code, result.stderr)
        });

        if attempt < retries {
            tokio::time::sleep(interval).await;
        }
    }

    HealthWaitResult {
        healthy: false,
        attempts: retries,
        detail: format!("health command did not succeed within {retries} attempt(s)"),
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_args_prefers_as_root_over_exec_user() {
        assert!(user_args(Some("1000:1000"), true).is_empty());
        assert_eq!(user_args(Some("1000:1000"), false), vec!["--user", "1000:1000"]);
        assert!(user_args(None, false).is_empty());
    }

    #[test]
    fn parse_poll_output_done_wins_regardless_of_pid_liveness() {
        let stdout = "DONE\n0\n---OUTPUT---\nbg-done\n";
        let status = parse_poll_output(stdout);
        assert!(!status.running);
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(status.output_tail, "bg-done\n");
    }

    #[test]
    fn parse_poll_output_alive_is_running() {
        let stdout = "ALIVE\n---OUTPUT---\npartial\n";
        let status = parse_poll_output(stdout);
        assert!(status.running);
        assert_eq!(status.exit_code, None);
    }

    #[test]
    fn parse_poll_output_gone_without_exit_file_is_not_running_but_unknown_exit() {
        let stdout = "GONE\n---OUTPUT---\n";
        let status = parse_poll_output(stdout);
        assert!(!status.running);
        assert_eq!(status.exit_code, None);
    }

    #[test]
    fn parse_poll_output_malformed_defaults_to_running() {
        let status = parse_poll_output("garbage with no marker");
        assert!(status.running);
    }

    #[tokio::test]
    #[ignore = "Requires Docker daemon running"]
    async fn background_job_round_trip_against_live_daemon() {
        let runtime = RuntimeAdapter::new();
        // Requires an already-running container named "amp-test" in CI.
        let handle = exec_background(
            &runtime,
            "amp-test",
            "sleep 2 && echo bg-done",
            None,
            true,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        let status = exec_poll(&runtime, &handle, Duration::from_secs(10)).await;
        println!("{status:?}");
    }
}
