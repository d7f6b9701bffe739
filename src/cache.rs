//! Image Cache: purpose-tagged cached images keyed by a profile digest
//! label, so a repeated `create` with the same profile can skip package
//! installation entirely.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::runtime::RuntimeAdapter;

/// Engine image tag for a purpose's cached image.
#[must_use]
pub fn cache_image_tag(purpose: &str) -> String {
    format!("amplifier-cache:{purpose}")
}

#[derive(Debug, Deserialize)]
struct ImageInspectEntry {
    #[serde(rename = "Config")]
    config: Option<ImageInspectConfig>,
}

#[derive(Debug, Deserialize)]
struct ImageInspectConfig {
    #[serde(rename = "Labels")]
    labels: Option<std::collections::HashMap<String, String>>,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// No cache image exists, or its digest label doesn't match.
    Miss,
    /// A cache image exists with a matching digest; use it verbatim.
    Hit {
        /// The cache image tag to substitute for the profile's base image.
        image: String,
    },
}

/// Look up the cache image for `purpose` and compare its
/// `amplifier.cache.version` label against `current_digest`.
pub async fn lookup(
    runtime: &RuntimeAdapter,
    purpose: &str,
    current_digest: &str,
    probe_timeout: Duration,
) -> CacheLookup {
    let tag = cache_image_tag(purpose);
    let result = runtime
        .run(&["image", "inspect", &tag], probe_timeout)
        .await;
    if !result.success() {
        debug!(purpose, "no cache image found");
        return CacheLookup::Miss;
    }

    let entries: Vec<ImageInspectEntry> = match serde_json::from_str(&result.stdout) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(purpose, error = %e, "malformed image inspect output, treating as cache miss");
            return CacheLookup::Miss;
        }
    };

    let digest = entries
        .first()
        .and_then(|e| e.config.as_ref())
        .and_then(|c| c.labels.as_ref())
        .and_then(|labels| labels.get("amplifier.cache.version"))
        .cloned();

    match digest {
        Some(d) if d == current_digest => CacheLookup::Hit { image: tag },
        Some(_) => {
            debug!(purpose, "cache image digest stale, treating as miss");
            CacheLookup::Miss
        }
        None => CacheLookup::Miss,
    }
}

/// Commit a running container as the new cache image for `purpose`,
/// labelling it with the current profile digest.
pub async fn commit(
    runtime: &RuntimeAdapter,
    container: &str,
    purpose: &str,
    digest: &str,
    timeout: Duration,
) -> bool {
    let tag = cache_image_tag(purpose);
    let label = format!("LABEL amplifier.cache.version={digest}");
    let result = runtime
        .run(
            &["commit", "--change", &label, container, &tag],
            timeout,
        )
        .await;
    if !result.success() {
        warn!(purpose, container, stderr = %result.stderr, "failed to commit cache image");
    }
    result.success()
}

/// Remove one named cache image, or every `amplifier-cache:*` image when
/// `purpose` is `None`.
pub async fn clear(
    runtime: &RuntimeAdapter,
    purpose: Option<&str>,
    timeout: Duration,
) -> Vec<String> {
    let tags = match purpose {
        Some(p) => vec![cache_image_tag(p)],
        None => {
            let result = runtime
                .run(
                    &[
                        "images",
                        "--filter",
                        "reference=amplifier-cache:*",
                        "--format",
                        "{{.Repository}}:{{.Tag}}",
                    ],
                    timeout,
                )
                .await;
            result
                .stdout
                .lines()
                .map(str::to_string)
                .filter(|l| !l.is_empty())
                .collect()
        }
    };

    let mut removed = Vec::new();
    for tag in tags {
        let result = runtime.run(&["rmi", "-f", &tag], timeout).await;
        if result.success() {
            removed.push(tag);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_image_tag_is_namespaced() {
        assert_eq!(cache_image_tag("python"), "amplifier-cache:python");
    }
}
