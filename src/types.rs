//! Core data model: purpose profiles, create requests, container records,
//! and the small value types shared across the pipeline.
//!
//! Follows the teacher's newtype/builder/`Display` conventions: validated
//! constructors, `#[must_use]` builder methods, and inline tests per type.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ContainerError, ContainerResult};
use crate::utils::validate_container_name;

/// A validated container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerName(String);

impl ContainerName {
    /// Validate and wrap a container name.
    pub fn new(name: impl Into<String>) -> ContainerResult<Self> {
        let name = name.into();
        validate_container_name(&name)?;
        Ok(Self(name))
    }

    /// Wrap a name already known to be valid (engine-reported names, test
    /// fixtures), skipping validation.
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bind mount: host path, container path, and read/write mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host.
    pub host: String,
    /// Path inside the container.
    pub container: String,
    /// Mount mode.
    #[serde(default)]
    pub mode: MountMode,
}

/// Read/write mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Read-write (default).
    #[default]
    Rw,
    /// Read-only.
    Ro,
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rw => write!(f, "rw"),
            Self::Ro => write!(f, "ro"),
        }
    }
}

/// A published port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A repository to clone as part of provisioning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoSpec {
    /// URL to clone.
    pub url: String,
    /// Destination path inside the container. Defaults to
    /// `/workspace/<basename-of-url>` when absent.
    #[serde(default)]
    pub path: Option<String>,
    /// Install command to run after cloning (`cd <path> && <install>`).
    #[serde(default)]
    pub install: Option<String>,
}

/// How host environment variables are propagated into the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvPassthroughMode {
    /// Glob-match host vars against the configured auto-passthrough
    /// patterns (default).
    #[default]
    Auto,
    /// Pass every host var except the never-passthrough set.
    All,
    /// Pass nothing from the host environment.
    None,
    /// Pass only the named host vars (still excluding never-passthrough).
    #[serde(untagged)]
    List(Vec<String>),
}

/// A named purpose profile: image, packages, setup, env, and
/// identity-forwarding defaults applied before request fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurposeProfile {
    /// Base image.
    pub image: String,
    /// OS packages installed via the package manager before setup commands.
    pub packages: Vec<String>,
    /// Shell commands run after package install, before the caller's own
    /// `setup_commands`.
    pub setup_commands: Vec<String>,
    /// Environment variables merged under the caller's explicit env. A
    /// `BTreeMap` rather than a `HashMap` so the digest below serializes
    /// its keys in a stable order.
    pub env: BTreeMap<String, String>,
    /// Forward host git configuration.
    pub forward_git: bool,
    /// Forward a `gh` auth token.
    pub forward_gh: bool,
    /// Bind-mount host SSH keys.
    pub forward_ssh: bool,
    /// Run the dotfiles provisioning step.
    pub dotfiles_enabled: bool,
}

impl PurposeProfile {
    /// The `apt-get`-style package install line, empty when there are no
    /// packages to install.
    #[must_use]
    pub fn package_install_command(&self) -> Option<String> {
        if self.packages.is_empty() {
            return None;
        }
        Some(format!(
            "apt-get update -qq && apt-get install -y -qq {}",
            self.packages.join(" ")
        ))
    }

    /// Stable 8-hex-char digest of this profile's structural
    /// representation, used as the cache-image invalidation label.
    #[must_use]
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        // Serialization is deterministic for a fixed struct field order,
        // and `env` is a BTreeMap so its keys serialize in sorted order too.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let hash = Sha256::digest(bytes);
        hash.iter().take(4).map(|b| format!("{b:02x}")).collect()
    }
}

/// The resolved, merged input to the Creation Pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Explicit container name; auto-generated when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Base image override.
    #[serde(default)]
    pub image: Option<String>,
    /// Purpose profile name.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Working directory inside the container.
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Bind-mount the host current working directory at `workdir`.
    #[serde(default = "default_true")]
    pub mount_cwd: bool,
    /// Additional bind mounts.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// Published ports.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Explicit environment variables; always wins over passthrough/profile.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Env passthrough mode.
    #[serde(default)]
    pub env_passthrough: EnvPassthroughMode,
    /// Forward host git configuration. `None` defers to the profile.
    #[serde(default)]
    pub forward_git: Option<bool>,
    /// Forward a `gh` auth token. `None` defers to the profile.
    #[serde(default)]
    pub forward_gh: Option<bool>,
    /// Bind-mount host SSH keys. `None` defers to the profile.
    #[serde(default)]
    pub forward_ssh: Option<bool>,
    /// Skip the dotfiles provisioning step outright.
    #[serde(default)]
    pub dotfiles_skip: bool,
    /// Override the dotfiles repo URL.
    #[serde(default)]
    pub dotfiles_repo: Option<String>,
    /// Override the dotfiles branch.
    #[serde(default)]
    pub dotfiles_branch: Option<String>,
    /// Inline dotfiles: relative path -> content.
    #[serde(default)]
    pub dotfiles_inline: HashMap<String, String>,
    /// Repositories to clone as part of provisioning.
    #[serde(default)]
    pub repos: Vec<RepoSpec>,
    /// Files to write inside the container: path -> content.
    #[serde(default)]
    pub config_files: HashMap<String, String>,
    /// Setup commands appended after profile setup.
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Engine memory-limit string, e.g. `"4g"`.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// Engine CPU-limit string, e.g. `"2"`.
    #[serde(default)]
    pub cpu_limit: Option<String>,
    /// Request GPU access (`--gpus all`).
    #[serde(default)]
    pub gpu: bool,
    /// Engine network name.
    #[serde(default = "default_network")]
    pub network: String,
    /// Whether the container should survive session end without cleanup.
    #[serde(default)]
    pub persistent: bool,
    /// User-supplied engine labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Inline Compose file content.
    #[serde(default)]
    pub compose_content: Option<String>,
    /// Path to an existing Compose file.
    #[serde(default)]
    pub compose_file: Option<String>,
    /// Repo URL, required when `purpose == "try-repo"`.
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Force a fresh image build, bypassing the cache.
    #[serde(default)]
    pub cache_bust: bool,
    /// Run exec-family operations as root, bypassing `exec_user`.
    #[serde(default)]
    pub as_root: bool,
}

fn default_workdir() -> String {
    "/workspace".to_string()
}
fn default_true() -> bool {
    true
}
fn default_memory_limit() -> String {
    "4g".to_string()
}
fn default_network() -> String {
    "bridge".to_string()
}

impl CreateRequest {
    /// Validate the invariants the Creation Pipeline depends on:
    /// `compose_content`/`compose_file` are mutually exclusive, and
    /// `repo_url` is required iff `purpose == "try-repo"`.
    pub fn validate(&self) -> ContainerResult<()> {
        if self.compose_content.is_some() && self.compose_file.is_some() {
            return Err(ContainerError::mutually_exclusive(
                "compose_content",
                "compose_file",
            ));
        }
        if self.purpose.as_deref() == Some("try-repo") && self.repo_url.is_none() {
            return Err(ContainerError::missing_field("create", "repo_url"));
        }
        Ok(())
    }
}

/// Forwarding flags actually applied during provisioning, persisted
/// alongside the Container Record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningFlags {
    /// Whether git config forwarding ran.
    pub forward_git: bool,
    /// Whether gh token forwarding ran.
    pub forward_gh: bool,
    /// Whether SSH key forwarding ran.
    pub forward_ssh: bool,
    /// Whether dotfiles provisioning ran.
    pub dotfiles_enabled: bool,
}

/// A persisted record for one managed container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Primary key; unique within the Metadata Store.
    pub name: String,
    /// Engine-assigned 12-char container id.
    pub container_id: String,
    /// Image the container was created from (cache image when a hit).
    pub image: String,
    /// Purpose profile name, if any.
    pub purpose: Option<String>,
    /// UTC creation timestamp, ISO-8601 with timezone.
    pub created: chrono::DateTime<chrono::Utc>,
    /// Whether the container is exempt from session-end cleanup.
    pub persistent: bool,
    /// Bind mounts configured at creation.
    pub mounts: Vec<Mount>,
    /// Whether the host cwd was mounted at `workdir`.
    pub mount_cwd: bool,
    /// Published ports.
    pub ports: Vec<PortMapping>,
    /// Names (never values) of environment variables set at creation.
    pub env_keys: Vec<String>,
    /// `uid:gid` used for exec operations, or `None` meaning root.
    pub exec_user: Option<String>,
    /// Compose project name, if this container joined one.
    pub compose_project: Option<String>,
    /// Compose file path used to start the project, if any.
    pub compose_file: Option<String>,
    /// Compose network the container joined, if any.
    pub compose_network: Option<String>,
    /// Forwarding flags actually applied.
    pub provisioning: ProvisioningFlags,
}

/// Outcome of a single provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The step ran and fully succeeded.
    Success,
    /// The step was intentionally bypassed.
    Skipped,
    /// The step ran and failed outright.
    Failed,
    /// The step ran with a mix of success and failure (e.g. multiple repos).
    Partial,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// One atom of the provisioning report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningStep {
    /// Step name, e.g. `"forward_git"`, `"dotfiles"`, `"repos"`.
    pub name: String,
    /// Outcome.
    pub status: StepStatus,
    /// Human-readable detail.
    pub detail: String,
    /// Error detail when `status == Failed | Partial`.
    #[serde(default)]
    pub error: Option<String>,
}

impl ProvisioningStep {
    /// Build a successful step.
    #[must_use]
    pub fn success(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Success,
            detail: detail.into(),
            error: None,
        }
    }

    /// Build a skipped step.
    #[must_use]
    pub fn skipped(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            detail: detail.into(),
            error: None,
        }
    }

    /// Build a failed step.
    #[must_use]
    pub fn failed(
        name: impl Into<String>,
        detail: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failed,
            detail: detail.into(),
            error: Some(error.into()),
        }
    }

    /// Build a partial step.
    #[must_use]
    pub fn partial(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Partial,
            detail: detail.into(),
            error: None,
        }
    }
}

/// Handle to a background job running inside a container: state is not
/// stored host-side, only the identifiers needed to poll it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJobHandle {
    /// 8-hex job id.
    pub job_id: String,
    /// Container the job is running inside.
    pub container: String,
    /// Launcher PID reported at spawn time.
    pub launcher_pid: u32,
}

impl BackgroundJobHandle {
    /// Path prefix for this job's temp-file triplet inside the container.
    #[must_use]
    pub fn path_prefix(&self) -> String {
        format!("/tmp/amp-job-{}", self.job_id)
    }
}

/// Result of polling a background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJobStatus {
    /// Whether the job is still running.
    pub running: bool,
    /// Exit code, once known.
    pub exit_code: Option<i32>,
    /// Last 100 lines of combined stdout+stderr.
    pub output_tail: String,
}

/// Result of `wait_healthy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthWaitResult {
    /// Whether the health command eventually succeeded.
    pub healthy: bool,
    /// Number of attempts made.
    pub attempts: u32,
    /// Human-readable summary.
    pub detail: String,
    /// Last failure output, if any.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_validates() {
        assert!(ContainerName::new("amp-python-abc123").is_ok());
        assert!(ContainerName::new("-bad").is_err());
    }

    #[test]
    fn mount_mode_display() {
        assert_eq!(MountMode::Rw.to_string(), "rw");
        assert_eq!(MountMode::Ro.to_string(), "ro");
    }

    #[test]
    fn port_mapping_display() {
        let p = PortMapping {
            host: 8080,
            container: 80,
        };
        assert_eq!(p.to_string(), "8080:80");
    }

    #[test]
    fn profile_digest_is_stable_and_eight_hex_chars() {
        let profile = PurposeProfile {
            image: "python:3.12-slim".into(),
            packages: vec!["git".into(), "curl".into()],
            setup_commands: vec![],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        };
        let d1 = profile.digest();
        let d2 = profile.digest();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 8);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn package_install_command_empty_when_no_packages() {
        let profile = PurposeProfile {
            image: "ubuntu:24.04".into(),
            packages: vec![],
            setup_commands: vec![],
            env: BTreeMap::new(),
            forward_git: false,
            forward_gh: false,
            forward_ssh: false,
            dotfiles_enabled: false,
        };
        assert!(profile.package_install_command().is_none());
    }

    #[test]
    fn create_request_rejects_both_compose_forms() {
        let req = CreateRequest {
            compose_content: Some("services: {}".into()),
            compose_file: Some("docker-compose.yml".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn create_request_requires_repo_url_for_try_repo() {
        let req = CreateRequest {
            purpose: Some("try-repo".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());

        let req = CreateRequest {
            purpose: Some("try-repo".into()),
            repo_url: Some("https://example.com/r.git".into()),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }
}
