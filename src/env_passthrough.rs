//! Host-to-container environment variable passthrough.

use std::collections::HashMap;

use glob::Pattern;

use crate::types::EnvPassthroughMode;

/// Host environment variables that are never forwarded, regardless of mode.
pub const NEVER_PASSTHROUGH: &[&str] = &[
    "PATH",
    "HOME",
    "SHELL",
    "USER",
    "LOGNAME",
    "PWD",
    "OLDPWD",
    "TERM",
    "DISPLAY",
    "DBUS_SESSION_BUS_ADDRESS",
    "XDG_RUNTIME_DIR",
    "SSH_AUTH_SOCK",
    "SSH_CONNECTION",
    "SSH_CLIENT",
    "SSH_TTY",
    "LS_COLORS",
    "LANG",
    "LC_ALL",
    "HOSTNAME",
    "SHLVL",
    "_",
];

fn is_never_passthrough(name: &str) -> bool {
    NEVER_PASSTHROUGH.contains(&name)
}

/// Resolve the env-passthrough mode against a supplied host environment
/// snapshot (injected so callers, and tests, don't depend on the real
/// process environment). The explicit `env` mapping from the request is
/// layered on last by the caller and always wins; this function only
/// computes the passthrough half.
#[must_use]
pub fn resolve(
    mode: &EnvPassthroughMode,
    host_env: &HashMap<String, String>,
    patterns: &[String],
) -> HashMap<String, String> {
    match mode {
        EnvPassthroughMode::None => HashMap::new(),
        EnvPassthroughMode::All => host_env
            .iter()
            .filter(|(k, _)| !is_never_passthrough(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        EnvPassthroughMode::List(names) => names
            .iter()
            .filter(|name| !is_never_passthrough(name))
            .filter_map(|name| host_env.get(name).map(|v| (name.clone(), v.clone())))
            .collect(),
        EnvPassthroughMode::Auto => {
            let compiled: Vec<Pattern> = patterns
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect();
            host_env
                .iter()
                .filter(|(k, _)| !is_never_passthrough(k))
                .filter(|(k, _)| compiled.iter().any(|p| p.matches(k)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
    }
}

/// Layer the request's explicit env mapping over the resolved passthrough
/// set, with explicit values always winning.
#[must_use]
pub fn merge_with_explicit(
    passthrough: HashMap<String, String>,
    explicit: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = passthrough;
    for (k, v) in explicit {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_host_env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("PATH".into(), "/usr/bin".into());
        env.insert("HOME".into(), "/root".into());
        env.insert("ANTHROPIC_API_KEY".into(), "sk-test".into());
        env.insert("OPENAI_TOKEN".into(), "tok-test".into());
        env.insert("RANDOM_VAR".into(), "nope".into());
        env
    }

    fn default_patterns() -> Vec<String> {
        vec!["*_API_KEY".into(), "*_TOKEN".into(), "ANTHROPIC_*".into()]
    }

    #[test]
    fn never_passthrough_excluded_in_every_mode() {
        let host = sample_host_env();
        for mode in [
            EnvPassthroughMode::All,
            EnvPassthroughMode::Auto,
            EnvPassthroughMode::List(vec!["PATH".into(), "ANTHROPIC_API_KEY".into()]),
        ] {
            let resolved = resolve(&mode, &host, &default_patterns());
            assert!(!resolved.contains_key("PATH"));
            assert!(!resolved.contains_key("HOME"));
        }
    }

    #[test]
    fn none_mode_is_empty() {
        let host = sample_host_env();
        let resolved = resolve(&EnvPassthroughMode::None, &host, &default_patterns());
        assert!(resolved.is_empty());
    }

    #[test]
    fn auto_mode_matches_configured_patterns_only() {
        let host = sample_host_env();
        let resolved = resolve(&EnvPassthroughMode::Auto, &host, &default_patterns());
        assert!(resolved.contains_key("ANTHROPIC_API_KEY"));
        assert!(resolved.contains_key("OPENAI_TOKEN"));
        assert!(!resolved.contains_key("RANDOM_VAR"));
    }

    #[test]
    fn explicit_env_wins_over_passthrough() {
        let host = sample_host_env();
        let passthrough = resolve(&EnvPassthroughMode::Auto, &host, &default_patterns());
        let mut explicit = HashMap::new();
        explicit.insert("ANTHROPIC_API_KEY".into(), "overridden".into());
        let merged = merge_with_explicit(passthrough, &explicit);
        assert_eq!(merged.get("ANTHROPIC_API_KEY").unwrap(), "overridden");
    }
}
