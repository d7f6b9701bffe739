//! Safety Gate: a pre/post/session-end hook family guarding risky
//! operations behind an approval taxonomy, plus the per-process session
//! state the hooks read and mutate.
//!
//! The gate does not itself destroy anything — the session-end hook only
//! announces what the caller should clean up.

use std::sync::Mutex;

use crate::config::{ApprovalCategory, ToolConfig};

/// Inputs the gate needs to evaluate one operation. Fields irrelevant to a
/// given operation are left at their defaults.
#[derive(Debug, Clone, Default)]
pub struct PreOpContext {
    /// Operation name (`"create"`, `"destroy_all"`, ...).
    pub operation: String,
    /// Request asks for GPU access.
    pub gpu: bool,
    /// Requested network mode/name.
    pub network: Option<String>,
    /// Host-side paths of every configured bind mount.
    pub mount_hosts: Vec<String>,
    /// Request forwards host SSH keys.
    pub forward_ssh: bool,
    /// Request passes through the entire host environment.
    pub all_env_passthrough: bool,
    /// `destroy_all` was called with `confirm=true`.
    pub destroy_all_confirm: bool,
}

/// Outcome of the pre-operation hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Nothing in the request requires confirmation.
    Allow,
    /// At least one approval category was triggered; `prompt` combines
    /// every triggered reason into one human-readable message.
    AskUser {
        /// Combined confirmation prompt.
        prompt: String,
        /// Individual reason strings, one per triggered category.
        reasons: Vec<String>,
    },
    /// The operation is refused outright, not merely gated behind approval.
    Deny {
        /// Why the gate refused.
        reason: String,
    },
}

/// Trim a trailing `/` from `path`, leaving `/` itself untouched.
fn trim_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Exact-prefix-equality sensitive-mount check: the mount's host path,
/// trailing slash trimmed, must exactly equal one of the configured
/// prefixes (also trimmed) for the mount to be flagged. This is
/// deliberately not a `starts_with` containment check — `/home/user/projects`
/// must not be flagged merely because `/home` is configured as sensitive.
/// No symlink resolution or `..` normalisation is performed; callers that
/// need that should canonicalize mount sources before calling `create`.
#[must_use]
pub fn is_sensitive_path(path: &str, prefixes: &[String]) -> bool {
    let path = trim_trailing_slash(path);
    prefixes
        .iter()
        .any(|prefix| trim_trailing_slash(prefix) == path)
}

/// Per-process session state: the set of container names this process has
/// created and not yet destroyed.
#[derive(Debug, Default)]
pub struct SafetySessionState {
    containers: Mutex<Vec<String>>,
}

impl SafetySessionState {
    /// An empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count of tracked containers.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    /// Snapshot of tracked container names.
    #[must_use]
    pub fn containers(&self) -> Vec<String> {
        self.containers.lock().unwrap().clone()
    }
}

/// Outcome of an operation, fed to the post-operation hook so it can update
/// the session's container list.
#[derive(Debug, Clone)]
pub enum PostOpOutcome {
    /// `create` succeeded, producing this container name.
    Created(String),
    /// `destroy` succeeded for this container name.
    Destroyed(String),
    /// `destroy_all` succeeded.
    DestroyedAll,
}

/// Evaluate the approval taxonomy against `ctx`. The hard container-quota
/// deny is checked *before* any reason is assembled, so a quota breach never
/// downgrades to a mere approval prompt.
pub fn handle_tool_pre(
    config: &ToolConfig,
    session: &SafetySessionState,
    ctx: &PreOpContext,
) -> ApprovalOutcome {
    if ctx.operation == "create" && session.container_count() >= config.max_containers_per_session as usize {
        return ApprovalOutcome::Deny {
            reason: format!(
                "session container limit reached ({} containers); destroy one before creating another",
                config.max_containers_per_session
            ),
        };
    }

    let mut reasons = Vec::new();
    let requires = |category: ApprovalCategory| config.require_approval_for.contains(&category);

    if ctx.gpu && requires(ApprovalCategory::GpuAccess) {
        reasons.push("requests GPU access".to_string());
    }
    if ctx.network.as_deref() == Some("host") && requires(ApprovalCategory::HostNetwork) {
        reasons.push("requests host networking".to_string());
    }
    if requires(ApprovalCategory::SensitiveMounts) {
        let sensitive: Vec<&str> = ctx
            .mount_hosts
            .iter()
            .map(String::as_str)
            .filter(|p| is_sensitive_path(p, &config.sensitive_mount_prefixes))
            .collect();
        if !sensitive.is_empty() {
            reasons.push(format!("mounts sensitive host path(s): {}", sensitive.join(", ")));
        }
    }
    if ctx.forward_ssh && requires(ApprovalCategory::SshForwarding) {
        reasons.push("forwards host SSH keys".to_string());
    }
    if ctx.all_env_passthrough && requires(ApprovalCategory::AllEnvPassthrough) {
        reasons.push("passes through the entire host environment".to_string());
    }
    if ctx.operation == "destroy_all" && requires(ApprovalCategory::DestroyAll) {
        reasons.push("destroys every managed container".to_string());
    }

    if reasons.is_empty() {
        return ApprovalOutcome::Allow;
    }

    let prompt = format!("This operation {}. Proceed?", reasons.join("; "));
    ApprovalOutcome::AskUser { prompt, reasons }
}

/// Update the session's tracked container list after an operation
/// completes.
pub fn handle_tool_post(session: &SafetySessionState, outcome: PostOpOutcome) {
    let mut containers = session.containers.lock().unwrap();
    match outcome {
        PostOpOutcome::Created(name) => containers.push(name),
        PostOpOutcome::Destroyed(name) => containers.retain(|c| c != &name),
        PostOpOutcome::DestroyedAll => containers.clear(),
    }
}

/// Announce the containers the caller should clean up at session end. Does
/// not destroy anything itself.
#[must_use]
pub fn handle_session_end(session: &SafetySessionState) -> Vec<String> {
    session.containers()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_is_sensitive_but_a_subdirectory_is_not() {
        let prefixes = vec!["/home".to_string(), "/etc".to_string()];
        assert!(is_sensitive_path("/home", &prefixes));
        assert!(is_sensitive_path("/home/", &prefixes));
        assert!(!is_sensitive_path("/home/user/projects", &prefixes));
    }

    #[test]
    fn quota_breach_is_a_hard_deny_checked_before_reasons() {
        let mut config = ToolConfig::default();
        config.max_containers_per_session = 1;
        let session = SafetySessionState::new();
        handle_tool_post(&session, PostOpOutcome::Created("amp-a-111111".into()));

        let ctx = PreOpContext {
            operation: "create".into(),
            gpu: true,
            ..Default::default()
        };
        match handle_tool_pre(&config, &session, &ctx) {
            ApprovalOutcome::Deny { .. } => {}
            other => panic!("expected Deny, got {other:?}"),
        }
    }

    #[test]
    fn gpu_and_ssh_both_surface_in_the_combined_prompt() {
        let config = ToolConfig::default();
        let session = SafetySessionState::new();
        let ctx = PreOpContext {
            operation: "create".into(),
            gpu: true,
            forward_ssh: true,
            ..Default::default()
        };
        match handle_tool_pre(&config, &session, &ctx) {
            ApprovalOutcome::AskUser { prompt, reasons } => {
                assert!(prompt.to_lowercase().contains("gpu"));
                assert!(prompt.to_lowercase().contains("ssh"));
                assert_eq!(reasons.len(), 2);
            }
            other => panic!("expected AskUser, got {other:?}"),
        }
    }

    #[test]
    fn no_triggers_allows() {
        let config = ToolConfig::default();
        let session = SafetySessionState::new();
        let ctx = PreOpContext {
            operation: "create".into(),
            ..Default::default()
        };
        assert_eq!(handle_tool_pre(&config, &session, &ctx), ApprovalOutcome::Allow);
    }

    #[test]
    fn post_hook_tracks_create_and_destroy() {
        let session = SafetySessionState::new();
        handle_tool_post(&session, PostOpOutcome::Created("amp-a-111111".into()));
        handle_tool_post(&session, PostOpOutcome::Created("amp-b-222222".into()));
        assert_eq!(session.container_count(), 2);

        handle_tool_post(&session, PostOpOutcome::Destroyed("amp-a-111111".into()));
        assert_eq!(session.containers(), vec!["amp-b-222222".to_string()]);

        handle_tool_post(&session, PostOpOutcome::DestroyedAll);
        assert_eq!(session.container_count(), 0);
    }

    #[test]
    fn session_end_announces_without_clearing() {
        let session = SafetySessionState::new();
        handle_tool_post(&session, PostOpOutcome::Created("amp-a-111111".into()));
        let announced = handle_session_end(&session);
        assert_eq!(announced, vec!["amp-a-111111".to_string()]);
        assert_eq!(session.container_count(), 1);
    }

    #[test]
    fn destroy_all_without_approval_category_does_not_require_confirm_in_gate() {
        // The gate's concern is the approval *prompt*; the hard `confirm=true`
        // requirement itself is enforced by the lifecycle operation, not here.
        let mut config = ToolConfig::default();
        config.require_approval_for.clear();
        let session = SafetySessionState::new();
        let ctx = PreOpContext {
            operation: "destroy_all".into(),
            ..Default::default()
        };
        assert_eq!(handle_tool_pre(&config, &session, &ctx), ApprovalOutcome::Allow);
    }
}
