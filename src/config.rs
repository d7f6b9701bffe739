//! Tool configuration accepted at construction time.
//!
//! Mirrors the teacher's `ExecutionConfig` pattern of a plain struct with a
//! `Default` impl, but validates cross-field invariants eagerly so a
//! malformed configuration fails at startup instead of at the first call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ContainerError, ContainerResult};

/// Per-tier timeout overrides, keyed by the concurrency-model tiers in
/// the design (probe/clone/run/setup).
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Quick probes: `test -x`, `printenv`, `inspect`, permission checks.
    pub probe: Duration,
    /// Repo clones and `cp`.
    pub clone_or_copy: Duration,
    /// `run` and `commit`.
    pub run_or_commit: Duration,
    /// User setup commands and dotfiles install.
    pub setup_command: Duration,
    /// Compose `up`.
    pub compose_up: Duration,
    /// Compose `down`.
    pub compose_down: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(10),
            clone_or_copy: Duration::from_secs(60),
            run_or_commit: Duration::from_secs(120),
            setup_command: Duration::from_secs(300),
            compose_up: Duration::from_secs(300),
            compose_down: Duration::from_secs(120),
        }
    }
}

/// Security-related knobs applied to every created container.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// `--pids-limit` applied to every created container.
    pub pids_limit: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { pids_limit: 512 }
    }
}

/// Auto-passthrough glob patterns for the `"auto"` env mode.
#[derive(Debug, Clone)]
pub struct AutoPassthroughConfig {
    /// Glob patterns matched against host environment variable names.
    pub env_patterns: Vec<String>,
}

impl Default for AutoPassthroughConfig {
    fn default() -> Self {
        Self {
            env_patterns: vec![
                "*_API_KEY".into(),
                "*_TOKEN".into(),
                "*_SECRET".into(),
                "ANTHROPIC_*".into(),
                "OPENAI_*".into(),
                "AZURE_OPENAI_*".into(),
                "GOOGLE_*".into(),
                "GEMINI_*".into(),
                "OLLAMA_*".into(),
                "VLLM_*".into(),
                "AMPLIFIER_*".into(),
                "HTTP_PROXY".into(),
                "HTTPS_PROXY".into(),
                "NO_PROXY".into(),
                "http_proxy".into(),
                "https_proxy".into(),
                "no_proxy".into(),
            ],
        }
    }
}

/// Dotfiles defaults.
#[derive(Debug, Clone, Default)]
pub struct DotfilesConfig {
    /// Default dotfiles repo URL, if the caller doesn't supply one.
    pub repo: Option<String>,
}

/// The approval categories the Safety Gate can require confirmation for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalCategory {
    /// Request asks for GPU access.
    GpuAccess,
    /// Request asks for host networking.
    HostNetwork,
    /// Request mounts a sensitive host path.
    SensitiveMounts,
    /// Request forwards SSH keys.
    SshForwarding,
    /// Request passes through the entire host environment.
    AllEnvPassthrough,
    /// Request destroys every managed container.
    DestroyAll,
}

impl ApprovalCategory {
    /// Parse the wire-format category name used in `require_approval_for`
    /// (`"gpu_access"`, `"host_network"`, `"sensitive_mounts"`,
    /// `"ssh_forwarding"`, `"all_env_passthrough"`, `"destroy_all"`).
    /// Unrecognised names are skipped rather than rejected.
    fn parse(name: &str) -> Option<Self> {
        match name {
            "gpu_access" => Some(Self::GpuAccess),
            "host_network" => Some(Self::HostNetwork),
            "sensitive_mounts" => Some(Self::SensitiveMounts),
            "ssh_forwarding" => Some(Self::SshForwarding),
            "all_env_passthrough" => Some(Self::AllEnvPassthrough),
            "destroy_all" => Some(Self::DestroyAll),
            _ => None,
        }
    }
}

/// Top-level tool configuration.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Default base image when a request supplies neither `image` nor
    /// `purpose`.
    pub default_image: String,
    /// Security hardening knobs.
    pub security: SecurityConfig,
    /// Auto env-passthrough pattern configuration.
    pub auto_passthrough: AutoPassthroughConfig,
    /// Dotfiles defaults.
    pub dotfiles: DotfilesConfig,
    /// Which approval categories require `ask_user` confirmation. Empty
    /// means the gate never escalates (still subject to hard `deny`s).
    pub require_approval_for: Vec<ApprovalCategory>,
    /// Host path prefixes treated as sensitive mount targets.
    pub sensitive_mount_prefixes: Vec<String>,
    /// Maximum containers a single process session may create.
    pub max_containers_per_session: u32,
    /// Whether non-persistent containers are torn down at session end.
    pub auto_cleanup_on_session_end: bool,
    /// Override engine binary path, bypassing auto-detection.
    pub engine_binary_path: Option<PathBuf>,
    /// Per-tier timeout overrides.
    pub timeouts: Timeouts,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_image: "ubuntu:24.04".to_string(),
            security: SecurityConfig::default(),
            auto_passthrough: AutoPassthroughConfig::default(),
            dotfiles: DotfilesConfig::default(),
            require_approval_for: vec![
                ApprovalCategory::GpuAccess,
                ApprovalCategory::HostNetwork,
                ApprovalCategory::SensitiveMounts,
                ApprovalCategory::SshForwarding,
                ApprovalCategory::AllEnvPassthrough,
                ApprovalCategory::DestroyAll,
            ],
            sensitive_mount_prefixes: vec![
                "/".into(),
                "/etc".into(),
                "/var".into(),
                "/root".into(),
                "/home".into(),
                "/boot".into(),
                "/sys".into(),
                "/proc".into(),
            ],
            max_containers_per_session: 20,
            auto_cleanup_on_session_end: true,
            engine_binary_path: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl ToolConfig {
    /// Validate cross-field invariants eagerly.
    pub fn validate(&self) -> ContainerResult<()> {
        if self.max_containers_per_session == 0 {
            return Err(ContainerError::invalid_name(
                "max_containers_per_session",
                "must be greater than zero",
            ));
        }
        if self.default_image.trim().is_empty() {
            return Err(ContainerError::invalid_name(
                "default_image",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Build a config from a loosely-typed mapping, applying `Default`
    /// for any absent key. Mirrors the `"mapping accepted at construction
    /// time"` configuration contract: recognised keys are `default_image`,
    /// `security.pids_limit`, `auto_passthrough.env_patterns`,
    /// `dotfiles.repo`, `require_approval_for`, `sensitive_mount_prefixes`,
    /// `max_containers_per_session`, `auto_cleanup_on_session_end`.
    pub fn from_map(map: &HashMap<String, serde_json::Value>) -> ContainerResult<Self> {
        let mut config = Self::default();

        if let Some(v) = map.get("default_image").and_then(|v| v.as_str()) {
            config.default_image = v.to_string();
        }
        if let Some(v) = map
            .get("security.pids_limit")
            .and_then(serde_json::Value::as_u64)
        {
            config.security.pids_limit = v as u32;
        }
        if let Some(v) = map
            .get("auto_passthrough.env_patterns")
            .and_then(|v| v.as_array())
        {
            config.auto_passthrough.env_patterns = v
                .iter()
                .filter_map(|x| x.as_str().map(str::to_string))
                .collect();
        }
        if let Some(v) = map.get("dotfiles.repo").and_then(|v| v.as_str()) {
            config.dotfiles.repo = Some(v.to_string());
        }
        if let Some(v) = map.get("require_approval_for").and_then(|v| v.as_array()) {
            config.require_approval_for = v
                .iter()
                .filter_map(|x| x.as_str())
                .filter_map(ApprovalCategory::parse)
                .collect();
        }
        if let Some(v) = map.get("sensitive_mount_prefixes").and_then(|v| v.as_array()) {
            config.sensitive_mount_prefixes = v
                .iter()
                .filter_map(|x| x.as_str().map(str::to_string))
                .collect();
        }
        if let Some(v) = map
            .get("max_containers_per_session")
            .and_then(serde_json::Value::as_u64)
        {
            config.max_containers_per_session = v as u32;
        }
        if let Some(v) = map
            .get("auto_cleanup_on_session_end")
            .and_then(|v| v.as_bool())
        {
            config.auto_cleanup_on_session_end = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ToolConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_session_limit_is_rejected() {
        let mut config = ToolConfig::default();
        config.max_containers_per_session = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_map_overrides_defaults() {
        let mut map = HashMap::new();
        map.insert("default_image".to_string(), serde_json::json!("alpine:3"));
        map.insert("max_containers_per_session".to_string(), serde_json::json!(5));
        let config = ToolConfig::from_map(&map).unwrap();
        assert_eq!(config.default_image, "alpine:3");
        assert_eq!(config.max_containers_per_session, 5);
    }
}
