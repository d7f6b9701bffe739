//! Lifecycle & Admin Ops: list/status/destroy/snapshot/restore/copy/network
//! management layered over the Metadata Store and Runtime Adapter.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::compose;
use crate::errors::{ContainerError, ContainerResult};
use crate::metadata::MetadataStore;
use crate::runtime::RuntimeAdapter;
use crate::types::ContainerRecord;

const MANAGED_LABEL_FILTER: &str = "label=amplifier.managed=true";

/// `list` filtered to every engine-reported container carrying
/// `amplifier.managed=true`.
pub async fn list(runtime: &RuntimeAdapter, probe_timeout: Duration) -> Vec<String> {
    let result = runtime
        .run(
            &["ps", "-a", "--filter", MANAGED_LABEL_FILTER, "--format", "{{.Names}}"],
            probe_timeout,
        )
        .await;
    result
        .stdout
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect()
}

/// `status`: merge the persisted record with a live engine `inspect`, when
/// the container still exists engine-side.
pub async fn status(
    runtime: &RuntimeAdapter,
    store: &MetadataStore,
    name: &str,
    probe_timeout: Duration,
) -> ContainerResult<(ContainerRecord, bool)> {
    let record = store
        .load(name)
        .await?
        .ok_or_else(|| ContainerError::container_not_found(name))?;
    let inspect = runtime.run(&["inspect", name], probe_timeout).await;
    Ok((record, inspect.success()))
}

/// Idempotent destroy: stop (or kill, when `force`), `rm -f`, remove
/// metadata. If the record carried a Compose project, tear that down (and
/// delete any temp Compose file) before removing the container itself.
pub async fn destroy(
    runtime: &RuntimeAdapter,
    store: &MetadataStore,
    name: &str,
    force: bool,
    stop_timeout: Duration,
    compose_down_timeout: Duration,
) -> ContainerResult<()> {
    let record = store.load(name).await?;

    if let Some(record) = &record {
        if let Some(project) = &record.compose_project {
            if !compose::down(runtime, project, compose_down_timeout).await {
                warn!(name, project, "compose down failed during destroy, continuing");
            }
            if let Some(compose_file) = &record.compose_file {
                if compose_file.starts_with(std::env::temp_dir().to_string_lossy().as_ref()) {
                    let _ = tokio::fs::remove_file(compose_file).await;
                }
            }
        }
    }

    if force {
        runtime.run(&["kill", name], stop_timeout).await;
    } else {
        runtime.run(&["stop", name], stop_timeout).await;
    }
    runtime.run(&["rm", "-f", name], stop_timeout).await;

    store.remove(name).await?;
    info!(name, "container destroyed");
    Ok(())
}

/// `destroy_all`: refuses without `confirm=true`. Returns the names it
/// destroyed.
pub async fn destroy_all(
    runtime: &RuntimeAdapter,
    store: &MetadataStore,
    confirm: bool,
    stop_timeout: Duration,
    compose_down_timeout: Duration,
) -> ContainerResult<Vec<String>> {
    if !confirm {
        return Err(ContainerError::safety_denied(
            "destroy_all requires confirm=true",
        ));
    }

    let records = store.list_all().await?;
    let mut destroyed = Vec::with_capacity(records.len());
    for record in records {
        destroy(runtime, store, &record.name, true, stop_timeout, compose_down_timeout).await?;
        destroyed.push(record.name);
    }
    Ok(destroyed)
}

/// `commit <container> amplifier-snapshot:<name>`.
pub async fn snapshot(
    runtime: &RuntimeAdapter,
    container: &str,
    snapshot_name: &str,
    timeout: Duration,
) -> ContainerResult<String> {
    let tag = format!("amplifier-snapshot:{snapshot_name}");
    runtime.run_checked(&["commit", container, &tag], timeout).await?;
    Ok(tag)
}

/// The image tag `restore` should pass through to `create`.
#[must_use]
pub fn restore_image(snapshot_name: &str) -> String {
    format!("amplifier-snapshot:{snapshot_name}")
}

fn realpath_or_original(path: &str) -> String {
    std::fs::canonicalize(Path::new(path))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// `cp <host> <container>:<dest>`, realpath-ing the host side first to
/// collapse symlinks (e.g. macOS `/tmp -> /private/tmp`).
pub async fn copy_in(
    runtime: &RuntimeAdapter,
    container: &str,
    host_path: &str,
    container_path: &str,
    timeout: Duration,
) -> ContainerResult<()> {
    let host_path = realpath_or_original(host_path);
    let target = format!("{container}:{container_path}");
    runtime.run_checked(&["cp", &host_path, &target], timeout).await?;
    Ok(())
}

/// `cp <container>:<src> <host>`, realpath-ing the host destination's
/// parent first.
pub async fn copy_out(
    runtime: &RuntimeAdapter,
    container: &str,
    container_path: &str,
    host_path: &str,
    timeout: Duration,
) -> ContainerResult<()> {
    let source = format!("{container}:{container_path}");
    let host_path = realpath_or_original(host_path);
    runtime.run_checked(&["cp", &source, &host_path], timeout).await?;
    Ok(())
}

/// `network create <name>`.
pub async fn create_network(runtime: &RuntimeAdapter, name: &str, timeout: Duration) -> ContainerResult<()> {
    runtime.run_checked(&["network", "create", name], timeout).await?;
    debug!(name, "network created");
    Ok(())
}

/// `network rm <name>`.
pub async fn destroy_network(runtime: &RuntimeAdapter, name: &str, timeout: Duration) -> ContainerResult<()> {
    runtime.run_checked(&["network", "rm", name], timeout).await?;
    debug!(name, "network destroyed");
    Ok(())
}

/// Remove one named cache image, or every `amplifier-cache:*` image.
pub async fn cache_clear(runtime: &RuntimeAdapter, purpose: Option<&str>, timeout: Duration) -> Vec<String> {
    crate::cache::clear(runtime, purpose, timeout).await
}
