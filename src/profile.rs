//! Purpose Profile table and the Profile Resolver that merges a profile's
//! defaults into a [`CreateRequest`].

use std::collections::BTreeMap;

use crate::types::{CreateRequest, EnvPassthroughMode, PurposeProfile};

/// Look up a named purpose profile. Returns `None` for unknown names (and
/// for `"try-repo"`, which has no static row — it resolves through the
/// Repo-Purpose Detector instead).
#[must_use]
pub fn lookup(purpose: &str) -> Option<PurposeProfile> {
    match purpose {
        "python" => Some(PurposeProfile {
            image: "python:3.12-slim".into(),
            packages: vec!["git".into(), "curl".into(), "build-essential".into()],
            setup_commands: vec!["pip install --quiet uv".into()],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        }),
        "node" => Some(PurposeProfile {
            image: "node:20-slim".into(),
            packages: vec!["git".into(), "curl".into()],
            setup_commands: vec!["corepack enable".into()],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        }),
        "rust" => Some(PurposeProfile {
            image: "rust:1-slim".into(),
            packages: vec![
                "git".into(),
                "curl".into(),
                "build-essential".into(),
                "pkg-config".into(),
                "libssl-dev".into(),
            ],
            setup_commands: vec![],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        }),
        "go" => Some(PurposeProfile {
            image: "golang:1.22".into(),
            packages: vec!["git".into(), "curl".into()],
            setup_commands: vec![],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        }),
        "general" => Some(PurposeProfile {
            image: "ubuntu:24.04".into(),
            packages: vec![
                "git".into(),
                "curl".into(),
                "build-essential".into(),
                "wget".into(),
                "jq".into(),
                "tree".into(),
                "vim-tiny".into(),
                "less".into(),
                "make".into(),
            ],
            setup_commands: vec![],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        }),
        "amplifier" => Some(PurposeProfile {
            image: "python:3.12-slim".into(),
            packages: vec!["git".into(), "curl".into(), "jq".into()],
            setup_commands: vec![
                "pip install --quiet uv".into(),
                "UV_TOOL_BIN_DIR=/usr/local/bin uv tool install amplifier".into(),
            ],
            env: BTreeMap::new(),
            forward_git: true,
            forward_gh: true,
            forward_ssh: false,
            dotfiles_enabled: true,
        }),
        "clean" => Some(PurposeProfile {
            image: "ubuntu:24.04".into(),
            packages: vec!["git".into(), "curl".into()],
            setup_commands: vec![],
            env: BTreeMap::new(),
            forward_git: false,
            forward_gh: false,
            forward_ssh: false,
            dotfiles_enabled: false,
        }),
        _ => None,
    }
}

/// The setup commands that originated from the profile (package install +
/// profile setup), kept separate from the caller's own `setup_commands` so
/// the Image Cache can strip them when replaying onto a cached image.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSetup {
    /// Commands contributed by the profile (package install + profile
    /// setup commands), in execution order.
    pub profile_commands: Vec<String>,
    /// The caller's own `setup_commands`, unchanged.
    pub user_commands: Vec<String>,
}

impl ResolvedSetup {
    /// All commands in execution order.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.profile_commands
            .iter()
            .chain(self.user_commands.iter())
            .cloned()
            .collect()
    }

    /// Only the caller's own commands, as replayed on a cache hit.
    #[must_use]
    pub fn user_only(&self) -> Vec<String> {
        self.user_commands.clone()
    }
}

/// Merge a profile's defaults into a request. Unknown purpose names leave
/// the request unchanged (per the Testable Properties boundary case).
///
/// Merge rules: (i) `image`/forwarding flags/`dotfiles_skip` are applied
/// only where the request left them unset; (ii) the profile's package
/// install line is prepended to setup commands, followed by the profile's
/// own setup commands, then the caller's; (iii) profile env is merged
/// under explicit env (explicit wins).
pub fn resolve(purpose: &str, mut request: CreateRequest) -> (CreateRequest, ResolvedSetup) {
    let Some(profile) = lookup(purpose) else {
        return (request, ResolvedSetup::default());
    };

    if request.image.is_none() {
        request.image = Some(profile.image.clone());
    }
    if request.forward_git.is_none() {
        request.forward_git = Some(profile.forward_git);
    }
    if request.forward_gh.is_none() {
        request.forward_gh = Some(profile.forward_gh);
    }
    if request.forward_ssh.is_none() {
        request.forward_ssh = Some(profile.forward_ssh);
    }
    if !profile.dotfiles_enabled {
        request.dotfiles_skip = true;
    }

    for (key, value) in &profile.env {
        request.env.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let mut profile_commands = Vec::new();
    if let Some(install) = profile.package_install_command() {
        profile_commands.push(install);
    }
    profile_commands.extend(profile.setup_commands.iter().cloned());

    let resolved = ResolvedSetup {
        profile_commands,
        user_commands: request.setup_commands.clone(),
    };

    (request, resolved)
}

/// Resolve the effective env-passthrough mode: the profile never
/// contributes one (it operates purely via the `env` map), so this is a
/// thin pass-through kept here for call-site symmetry with `resolve`.
#[must_use]
pub fn passthrough_mode(request: &CreateRequest) -> &EnvPassthroughMode {
    &request.env_passthrough
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_purpose_passes_request_through_unchanged() {
        let request = CreateRequest {
            purpose: Some("frobnicate".into()),
            ..Default::default()
        };
        let (resolved, setup) = resolve("frobnicate", request.clone());
        assert_eq!(resolved.image, request.image);
        assert!(setup.profile_commands.is_empty());
    }

    #[test]
    fn python_profile_fills_in_image_and_forwarding_defaults() {
        let request = CreateRequest::default();
        let (resolved, setup) = resolve("python", request);
        assert_eq!(resolved.image.as_deref(), Some("python:3.12-slim"));
        assert_eq!(resolved.forward_git, Some(true));
        assert_eq!(resolved.forward_ssh, Some(false));
        assert!(setup.profile_commands.iter().any(|c| c.contains("apt-get")));
        assert!(setup
            .profile_commands
            .iter()
            .any(|c| c.contains("pip install")));
    }

    #[test]
    fn explicit_request_fields_win_over_profile_defaults() {
        let request = CreateRequest {
            image: Some("python:3.11".into()),
            forward_git: Some(false),
            ..Default::default()
        };
        let (resolved, _) = resolve("python", request);
        assert_eq!(resolved.image.as_deref(), Some("python:3.11"));
        assert_eq!(resolved.forward_git, Some(false));
    }

    #[test]
    fn clean_profile_disables_dotfiles() {
        let (resolved, _) = resolve("clean", CreateRequest::default());
        assert!(resolved.dotfiles_skip);
    }

    #[test]
    fn resolved_setup_orders_profile_then_user_commands() {
        let request = CreateRequest {
            setup_commands: vec!["echo hi".into()],
            ..Default::default()
        };
        let (_, setup) = resolve("node", request);
        let all = setup.all();
        assert_eq!(all.last().map(String::as_str), Some("echo hi"));
        assert!(all.len() > 1);
    }
}
