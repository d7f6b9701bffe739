//! Compose Manager: up/down/ps/network-name for multi-service Compose
//! projects that a created container can join as a sibling.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::runtime::RuntimeAdapter;

/// One service observed via `compose ps`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeService {
    /// Service name as declared in the Compose file.
    #[serde(rename = "Service", alias = "service")]
    pub service: String,
    /// Container name or id Compose assigned it.
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    /// Reported state (`running`, `exited`, ...).
    #[serde(rename = "State", alias = "state", default)]
    pub state: String,
}

/// Whether `compose` is available on the detected engine.
pub async fn is_available(runtime: &RuntimeAdapter, probe_timeout: Duration) -> bool {
    runtime
        .run(&["compose", "version"], probe_timeout)
        .await
        .success()
}

/// `compose -f <file> -p <project> up -d`.
pub async fn up(
    runtime: &RuntimeAdapter,
    compose_file: &str,
    project: &str,
    timeout: Duration,
) -> crate::errors::ContainerResult<()> {
    let result = runtime
        .run(
            &["compose", "-f", compose_file, "-p", project, "up", "-d"],
            timeout,
        )
        .await;
    if result.timed_out() {
        return Err(crate::errors::ContainerError::timeout(
            format!("compose -f {compose_file} -p {project} up -d"),
            timeout,
        ));
    }
    if !result.success() {
        return Err(crate::errors::ContainerError::engine_failed(
            format!("compose -f {compose_file} -p {project} up -d"),
            result.exit_code,
            result.stderr,
        ));
    }
    debug!(project, "compose project started");
    Ok(())
}

/// `compose -p <project> down --remove-orphans`. No `-f` is needed: Compose
/// resolves a running project by name alone.
pub async fn down(runtime: &RuntimeAdapter, project: &str, timeout: Duration) -> bool {
    let result = runtime
        .run(
            &["compose", "-p", project, "down", "--remove-orphans"],
            timeout,
        )
        .await;
    if !result.success() {
        warn!(project, stderr = %result.stderr, "compose down failed");
    }
    result.success()
}

/// `compose -p <project> ps --format json`, tolerant of a JSON array, a
/// single JSON object, or newline-delimited JSON objects. Falls back to an
/// empty list on any parse failure rather than propagating an error, since
/// this is used for a best-effort summary step in the creation pipeline.
pub async fn ps(runtime: &RuntimeAdapter, project: &str, probe_timeout: Duration) -> Vec<ComposeService> {
    let result = runtime
        .run(
            &["compose", "-p", project, "ps", "--format", "json"],
            probe_timeout,
        )
        .await;
    if !result.success() {
        return Vec::new();
    }
    parse_ps_output(&result.stdout)
}

fn parse_ps_output(stdout: &str) -> Vec<ComposeService> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(services) = serde_json::from_str::<Vec<ComposeService>>(trimmed) {
        return services;
    }
    if let Ok(service) = serde_json::from_str::<ComposeService>(trimmed) {
        return vec![service];
    }
    // Newline-delimited JSON: one object per line.
    let services: Vec<ComposeService> = trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    services
}

/// Construct `<project>_default` and confirm it exists via `network
/// inspect`. Returns `None` when the network can't be confirmed.
pub async fn get_network_name(
    runtime: &RuntimeAdapter,
    project: &str,
    probe_timeout: Duration,
) -> Option<String> {
    let network = format!("{project}_default");
    let result = runtime
        .run(&["network", "inspect", &network], probe_timeout)
        .await;
    if result.success() {
        Some(network)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array() {
        let stdout = r#"[{"Service":"web","Name":"proj_web_1","State":"running"}]"#;
        let services = parse_ps_output(stdout);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].service, "web");
    }

    #[test]
    fn parses_single_object() {
        let stdout = r#"{"Service":"db","Name":"proj_db_1","State":"running"}"#;
        let services = parse_ps_output(stdout);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].service, "db");
    }

    #[test]
    fn parses_newline_delimited_objects() {
        let stdout = "{\"Service\":\"web\",\"Name\":\"w\",\"State\":\"running\"}\n{\"Service\":\"db\",\"Name\":\"d\",\"State\":\"running\"}\n";
        let services = parse_ps_output(stdout);
        assert_eq!(services.len(), 2);
    }

    #[test]
    fn malformed_output_yields_empty_list() {
        assert!(parse_ps_output("not json at all").is_empty());
        assert!(parse_ps_output("").is_empty());
    }

    #[test]
    fn network_name_is_project_suffixed() {
        assert_eq!(format!("{}_default", "myproj"), "myproj_default");
    }
}
