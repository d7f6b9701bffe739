//! Provisioner: host identity/credential/content injection into a running
//! container. Each injection is independent — a failure is reported as a
//! [`ProvisioningStep`], never propagated — and determines the container's
//! target home directory dynamically rather than assuming `/root`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::Command as HostCommand;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

use crate::runtime::RuntimeAdapter;
use crate::types::{ProvisioningStep, RepoSpec, StepStatus};

/// Sections stripped from the host's effective git config before
/// projecting it into the container: these carry credentials, include
/// directives, or host-specific trust state that must not cross the
/// boundary.
const EXCLUDED_GIT_SECTIONS: &[&str] = &["credential", "include", "includeif", "http", "safe"];

const COMMON_DOTFILES: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".bash_aliases",
    ".zshrc",
    ".zprofile",
    ".gitconfig",
    ".gitignore_global",
    ".vimrc",
    ".tmux.conf",
    ".inputrc",
    ".editorconfig",
];

async fn exec_sh(
    runtime: &RuntimeAdapter,
    container: &str,
    script: &str,
    timeout: Duration,
) -> crate::runtime::CommandResult {
    runtime
        .run(&["exec", container, "sh", "-c", script], timeout)
        .await
}

/// Read `$HOME` inside the container, falling back to `/root` when empty or
/// the probe fails.
pub async fn target_home(runtime: &RuntimeAdapter, container: &str, probe_timeout: Duration) -> String {
    let result = exec_sh(runtime, container, "printenv HOME", probe_timeout).await;
    let home = result.stdout.trim();
    if home.is_empty() {
        "/root".to_string()
    } else {
        home.to_string()
    }
}

/// Write `content` to `path` inside the container via an `sh -c` here-doc
/// using a quoted delimiter (so no shell expansion of the content occurs)
/// and a randomly generated sentinel so a collision with the content itself
/// is effectively impossible.
fn heredoc_write_command(path: &str, content: &str, append: bool) -> String {
    let sentinel = format!("AMPLIFIER_EOF_{}", crate::utils::random_hex(12));
    let redirect = if append { ">>" } else { ">" };
    format!(
        "mkdir -p \"$(dirname '{path}')\" && cat {redirect} '{path}' <<'{sentinel}'\n{content}\n{sentinel}\n"
    )
}

// ---------------------------------------------------------------------
// git
// ---------------------------------------------------------------------

/// Parse `git config --list` output (`key=value` per line, includes already
/// resolved by git itself) into `(key, value)` pairs, dropping excluded
/// sections.
#[must_use]
pub fn parse_git_config(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| {
            let section = key.split('.').next().unwrap_or_default().to_lowercase();
            !EXCLUDED_GIT_SECTIONS.contains(&section.as_str())
        })
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn escape_git_value(value: &str) -> String {
    if value.contains('\\') || value.contains('"') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

/// Render resolved `(key, value)` pairs as `.gitconfig` INI content. Keys
/// with two dotted components become `[section]` / `subkey = value`; keys
/// with three become `[section "middle"]` / `subkey = value`.
#[must_use]
pub fn render_gitconfig(pairs: &[(String, String)]) -> String {
    let mut out = String::new();
    let mut current_header: Option<String> = None;

    for (key, value) in pairs {
        let parts: Vec<&str> = key.splitn(3, '.').collect();
        let (header, subkey) = match parts.as_slice() {
            [section, subkey] => (format!("[{section}]"), (*subkey).to_string()),
            [section, middle, subkey] => {
                (format!("[{section} \"{middle}\"]"), (*subkey).to_string())
            }
            _ => continue,
        };
        if current_header.as_deref() != Some(header.as_str()) {
            out.push_str(&header);
            out.push('\n');
            current_header = Some(header);
        }
        out.push_str(&format!("\t{subkey} = {}\n", escape_git_value(value)));
    }
    out
}

/// Read the host's effective global git configuration via `git config
/// --global --list` (a host subprocess, not a file parse — git resolves
/// `[include]`/`[includeIf]` chains for us).
pub async fn read_host_git_config() -> Option<String> {
    let output = tokio_timeout(
        Duration::from_secs(10),
        HostCommand::new("git")
            .args(["config", "--global", "--list"])
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Project the host's safe git config subset into the container, and copy
/// `~/.gitconfig.local` / `~/.ssh/known_hosts` verbatim when present on the
/// host. Skipped (not failed) when the host has no git configuration.
pub async fn provision_git(
    runtime: &RuntimeAdapter,
    container: &str,
    home: &str,
    probe_timeout: Duration,
) -> ProvisioningStep {
    let Some(raw) = read_host_git_config().await else {
        return ProvisioningStep::skipped("forward_git", "host has no git configuration");
    };

    let pairs = parse_git_config(&raw);
    if pairs.is_empty() {
        return ProvisioningStep::skipped("forward_git", "host git config had nothing to forward");
    }

    let rendered = render_gitconfig(&pairs);
    let script = heredoc_write_command(&format!("{home}/.gitconfig"), &rendered, true);
    let result = exec_sh(runtime, container, &script, probe_timeout).await;
    if !result.success() {
        return ProvisioningStep::failed(
            "forward_git",
            "failed writing .gitconfig into container",
            result.stderr,
        );
    }

    for extra in [".gitconfig.local", ".ssh/known_hosts"] {
        if let Some(host_path) = dirs::home_dir().map(|h| h.join(extra)) {
            if let Ok(content) = tokio::fs::read_to_string(&host_path).await {
                let dest = format!("{home}/{extra}");
                let script = heredoc_write_command(&dest, &content, false);
                let _ = exec_sh(runtime, container, &script, probe_timeout).await;
            }
        }
    }

    ProvisioningStep::success(
        "forward_git",
        format!("forwarded {} git config keys", pairs.len()),
    )
}

// ---------------------------------------------------------------------
// gh
// ---------------------------------------------------------------------

/// Read a `gh` auth token from the host, if the `gh` CLI is present and
/// logged in.
pub async fn read_host_gh_token() -> Option<String> {
    let output = tokio_timeout(
        Duration::from_secs(10),
        HostCommand::new("gh").args(["auth", "token"]).output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Verify the token injected as `GH_TOKEN`/`GITHUB_TOKEN` environment
/// variables at creation time is visible inside the container and, if the
/// `gh` CLI is present there, log it in. The raw token never appears on a
/// command line: it is piped into `gh auth login --with-token` via
/// `printenv`.
pub async fn provision_gh(
    runtime: &RuntimeAdapter,
    container: &str,
    probe_timeout: Duration,
) -> ProvisioningStep {
    let visible = exec_sh(runtime, container, "printenv GH_TOKEN", probe_timeout).await;
    if !visible.success() || visible.stdout.trim().is_empty() {
        return ProvisioningStep::skipped("forward_gh", "no gh token was forwarded at creation");
    }

    let has_gh = exec_sh(runtime, container, "command -v gh", probe_timeout).await;
    if !has_gh.success() {
        return ProvisioningStep::success(
            "forward_gh",
            "GH_TOKEN/GITHUB_TOKEN set; gh CLI not present in container to log in",
        );
    }

    let login = exec_sh(
        runtime,
        container,
        "printenv GH_TOKEN | gh auth login --with-token",
        probe_timeout,
    )
    .await;
    if login.success() {
        ProvisioningStep::success("forward_gh", "gh CLI authenticated with forwarded token")
    } else {
        ProvisioningStep::failed(
            "forward_gh",
            "gh auth login --with-token failed",
            login.stderr,
        )
    }
}

// ---------------------------------------------------------------------
// ssh
// ---------------------------------------------------------------------

/// Copy SSH keys bind-mounted read-only at `staging_path` into the target
/// user's `~/.ssh/`, applying the standard permission discipline. A
/// failure that would leave keys world-readable is reported as `failed`.
pub async fn provision_ssh(
    runtime: &RuntimeAdapter,
    container: &str,
    home: &str,
    staging_path: &str,
    probe_timeout: Duration,
) -> ProvisioningStep {
    let ssh_dir = format!("{home}/.ssh");
    let copy_script = format!(
        "mkdir -p '{ssh_dir}' && chmod 700 '{ssh_dir}' && cp -a {staging_path}/. '{ssh_dir}/' 2>&1"
    );
    let copy = exec_sh(runtime, container, &copy_script, probe_timeout).await;
    if !copy.success() {
        return ProvisioningStep::failed("forward_ssh", "failed copying SSH keys", copy.stderr);
    }

    // Public material and config are world-readable by convention; every
    // remaining file (private keys) must not be.
    let perm_script = format!(
        "cd '{ssh_dir}' && chmod 644 *.pub known_hosts config 2>/dev/null; \
         for f in *; do case \"$f\" in *.pub|known_hosts|config) ;; *) chmod 600 \"$f\" 2>/dev/null ;; esac; done"
    );
    let perms = exec_sh(runtime, container, &perm_script, probe_timeout).await;
    if !perms.success() {
        return ProvisioningStep::failed(
            "forward_ssh",
            "failed applying SSH key permissions; keys may be world-readable",
            perms.stderr,
        );
    }

    ProvisioningStep::success("forward_ssh", format!("SSH keys staged into {ssh_dir}"))
}

// ---------------------------------------------------------------------
// dotfiles
// ---------------------------------------------------------------------

/// Dotfiles provisioning options, resolved from the create request.
#[derive(Debug, Clone, Default)]
pub struct DotfilesSpec {
    /// Skip this step entirely.
    pub skip: bool,
    /// Repo to shallow-clone, if any (else the symlink fallback runs).
    pub repo: Option<String>,
    /// Branch to check out.
    pub branch: Option<String>,
    /// Inline path -> content overrides written in addition to (or instead
    /// of) a repo clone.
    pub inline: HashMap<String, String>,
}

/// Clone a dotfiles repo and run the first bootstrap script found, else
/// `make`, else symlink common dotfiles into `~`; write any inline files
/// regardless.
pub async fn provision_dotfiles(
    runtime: &RuntimeAdapter,
    container: &str,
    home: &str,
    spec: &DotfilesSpec,
    clone_timeout: Duration,
    setup_timeout: Duration,
) -> ProvisioningStep {
    if spec.skip {
        return ProvisioningStep::skipped("dotfiles", "dotfiles provisioning disabled");
    }
    if spec.repo.is_none() && spec.inline.is_empty() {
        return ProvisioningStep::skipped("dotfiles", "no dotfiles repo or inline files supplied");
    }

    let mut failures = Vec::new();

    if let Some(repo) = &spec.repo {
        let target = format!("{home}/.dotfiles");
        let branch_args = spec
            .branch
            .as_ref()
            .map(|b| format!("-b '{b}' "))
            .unwrap_or_default();
        let clone_script =
            format!("rm -rf '{target}' && git clone --depth 1 {branch_args}'{repo}' '{target}'");
        let clone = exec_sh(runtime, container, &clone_script, clone_timeout).await;
        if !clone.success() {
            failures.push(format!("clone failed: {}", clone.stderr));
        } else {
            let bootstrap_script = format!(
                "cd '{target}' && \
                 for f in install.sh setup.sh bootstrap.sh script/setup; do \
                   if [ -x \"$f\" ]; then \"./$f\"; exit $?; fi; \
                 done; \
                 if [ -f Makefile ]; then make; exit $?; fi; \
                 for f in {}; do \
                   if [ -f \"$f\" ]; then ln -sf \"{target}/$f\" \"{home}/$f\"; fi; \
                 done",
                COMMON_DOTFILES.join(" ")
            );
            let bootstrap = exec_sh(runtime, container, &bootstrap_script, setup_timeout).await;
            if !bootstrap.success() {
                failures.push(format!("bootstrap failed: {}", bootstrap.stderr));
            }
        }
    }

    for (path, content) in &spec.inline {
        let dest = format!("{home}/{path}");
        let script = heredoc_write_command(&dest, content, false);
        let result = exec_sh(runtime, container, &script, clone_timeout).await;
        if !result.success() {
            failures.push(format!("inline write of {path} failed: {}", result.stderr));
        }
    }

    if failures.is_empty() {
        ProvisioningStep::success("dotfiles", "dotfiles provisioned")
    } else if failures.len() < usize::from(spec.repo.is_some()) + spec.inline.len() {
        ProvisioningStep::partial("dotfiles", failures.join("; "))
    } else {
        ProvisioningStep::failed("dotfiles", "all dotfiles steps failed", failures.join("; "))
    }
}

// ---------------------------------------------------------------------
// repos
// ---------------------------------------------------------------------

fn basename(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("repo")
        .trim_end_matches(".git")
        .to_string()
}

/// Clone each of `repos` into its destination path, running its install
/// command when set. Aggregate status: all succeed -> success, some fail ->
/// partial, all fail -> failed.
pub async fn provision_repos(
    runtime: &RuntimeAdapter,
    container: &str,
    repos: &[RepoSpec],
    workdir: &str,
    clone_timeout: Duration,
    install_timeout: Duration,
) -> ProvisioningStep {
    if repos.is_empty() {
        return ProvisioningStep::skipped("repos", "no repos requested");
    }

    let mut succeeded = 0usize;
    let mut errors = Vec::new();

    for repo in repos {
        let path = repo
            .path
            .clone()
            .unwrap_or_else(|| format!("{workdir}/{}", basename(&repo.url)));
        let clone_script = format!("git clone '{}' '{path}'", repo.url);
        let clone = exec_sh(runtime, container, &clone_script, clone_timeout).await;
        if !clone.success() {
            errors.push(format!("{}: clone failed: {}", repo.url, clone.stderr));
            continue;
        }

        if let Some(install) = &repo.install {
            let install_script = format!("cd '{path}' && {install}");
            let result = exec_sh(runtime, container, &install_script, install_timeout).await;
            if !result.success() {
                errors.push(format!("{}: install failed: {}", repo.url, result.stderr));
                continue;
            }
        }
        succeeded += 1;
    }

    if succeeded == repos.len() {
        ProvisioningStep::success("repos", format!("cloned {succeeded} repo(s)"))
    } else if succeeded == 0 {
        ProvisioningStep::failed("repos", "all repo clones failed", errors.join("; "))
    } else {
        ProvisioningStep::partial(
            "repos",
            format!(
                "{succeeded}/{} repos succeeded: {}",
                repos.len(),
                errors.join("; ")
            ),
        )
    }
}

// ---------------------------------------------------------------------
// config_files
// ---------------------------------------------------------------------

/// Write each `path -> content` entry inside the container, creating parent
/// directories as needed.
pub async fn provision_config_files(
    runtime: &RuntimeAdapter,
    container: &str,
    files: &HashMap<String, String>,
    write_timeout: Duration,
) -> ProvisioningStep {
    if files.is_empty() {
        return ProvisioningStep::skipped("config_files", "no config files requested");
    }

    let mut failures = Vec::new();
    for (path, content) in files {
        let script = heredoc_write_command(path, content, false);
        let result = exec_sh(runtime, container, &script, write_timeout).await;
        if !result.success() {
            failures.push(format!("{path}: {}", result.stderr));
        }
    }

    if failures.is_empty() {
        ProvisioningStep::success("config_files", format!("wrote {} file(s)", files.len()))
    } else if failures.len() == files.len() {
        ProvisioningStep::failed("config_files", "all config files failed to write", failures.join("; "))
    } else {
        ProvisioningStep::partial("config_files", failures.join("; "))
    }
}

// ---------------------------------------------------------------------
// amplifier settings
// ---------------------------------------------------------------------

/// Copy `~/.amplifier/settings.yaml` and `settings.local.yaml` from the
/// host into `<target-home>/.amplifier/`, when the purpose is `amplifier`
/// and the files exist on the host.
pub async fn provision_amplifier_settings(
    runtime: &RuntimeAdapter,
    container: &str,
    home: &str,
    write_timeout: Duration,
) -> ProvisioningStep {
    let Some(host_home) = dirs::home_dir() else {
        return ProvisioningStep::skipped("amplifier_settings", "no host home directory");
    };

    let mut copied = 0;
    for file in ["settings.yaml", "settings.local.yaml"] {
        let host_path = host_home.join(".amplifier").join(file);
        let Ok(content) = tokio::fs::read_to_string(&host_path).await else {
            continue;
        };
        let dest = format!("{home}/.amplifier/{file}");
        let script = heredoc_write_command(&dest, &content, false);
        let result = exec_sh(runtime, container, &script, write_timeout).await;
        if result.success() {
            copied += 1;
        }
    }

    if copied == 0 {
        ProvisioningStep::skipped("amplifier_settings", "no host amplifier settings found")
    } else {
        ProvisioningStep::success("amplifier_settings", format!("copied {copied} settings file(s)"))
    }
}

// ---------------------------------------------------------------------
// setup commands
// ---------------------------------------------------------------------

/// Run each setup command in order inside the container. Aggregate status
/// is success only when every command exits zero.
pub async fn run_setup_commands(
    runtime: &RuntimeAdapter,
    container: &str,
    commands: &[String],
    per_command_timeout: Duration,
) -> ProvisioningStep {
    if commands.is_empty() {
        return ProvisioningStep::skipped("setup_commands", "no setup commands");
    }

    let mut failures = Vec::new();
    for command in commands {
        let result = exec_sh(runtime, container, command, per_command_timeout).await;
        if !result.success() {
            warn!(command, exit_code = result.exit_code, "setup command failed");
            failures.push(format!("`{command}` exited {}: {}", result.exit_code, result.stderr));
        }
    }

    if failures.is_empty() {
        ProvisioningStep::success("setup_commands", format!("ran {} command(s)", commands.len()))
    } else {
        ProvisioningStep::partial("setup_commands", failures.join("; "))
    }
}

// ---------------------------------------------------------------------
// two-phase user ownership
// ---------------------------------------------------------------------

/// Create (or idempotently reuse) a `hostuser` account mapped to the given
/// host `uid:gid` inside the container, so first-boot provisioning that
/// needs root can still leave workload output host-owned afterward.
pub async fn map_host_user(
    runtime: &RuntimeAdapter,
    container: &str,
    uid: u32,
    gid: u32,
    probe_timeout: Duration,
) -> bool {
    let script = format!(
        "groupadd -g {gid} -o hostgroup 2>/dev/null; \
         useradd -u {uid} -g {gid} -o -m -s /bin/sh hostuser 2>/dev/null; true"
    );
    exec_sh(runtime, container, &script, probe_timeout).await.success()
}

/// `chown -R <uid>:<gid> <path>` inside the container.
pub async fn fix_ownership(
    runtime: &RuntimeAdapter,
    container: &str,
    uid: u32,
    gid: u32,
    path: &str,
    probe_timeout: Duration,
) -> bool {
    let script = format!("chown -R {uid}:{gid} '{path}'");
    exec_sh(runtime, container, &script, probe_timeout).await.success()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_git_config_excludes_sensitive_sections() {
        let raw = "user.name=Ada Lovelace\nuser.email=ada@example.com\n\
                   credential.helper=store\ninclude.path=/etc/gitconfig\n\
                   http.sslverify=false\nsafe.directory=*\n\
                   branch.main.remote=origin\n";
        let pairs = parse_git_config(raw);
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"user.name"));
        assert!(keys.contains(&"branch.main.remote"));
        assert!(!keys.iter().any(|k| k.starts_with("credential")));
        assert!(!keys.iter().any(|k| k.starts_with("include")));
        assert!(!keys.iter().any(|k| k.starts_with("http")));
        assert!(!keys.iter().any(|k| k.starts_with("safe")));
    }

    #[test]
    fn render_gitconfig_groups_two_and_three_component_keys() {
        let pairs = vec![
            ("user.name".to_string(), "Ada Lovelace".to_string()),
            ("user.email".to_string(), "ada@example.com".to_string()),
            ("branch.main.remote".to_string(), "origin".to_string()),
        ];
        let rendered = render_gitconfig(&pairs);
        assert!(rendered.contains("[user]"));
        assert!(rendered.contains("name = Ada Lovelace"));
        assert!(rendered.contains("[branch \"main\"]"));
        assert!(rendered.contains("remote = origin"));
    }

    #[test]
    fn escape_git_value_quotes_backslash_and_double_quote() {
        assert_eq!(escape_git_value("plain"), "plain");
        assert_eq!(escape_git_value(r#"has "quote""#), "\"has \\\"quote\\\"\"");
        assert_eq!(escape_git_value(r"back\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn heredoc_command_never_interpolates_content() {
        let script = heredoc_write_command("/root/.gitconfig", "$(rm -rf /) `whoami`", true);
        assert!(script.contains("<<'"));
        assert!(script.contains("$(rm -rf /) `whoami`"));
    }

    #[test]
    fn basename_strips_git_suffix_and_trailing_slash() {
        assert_eq!(basename("https://github.com/user/repo.git"), "repo");
        assert_eq!(basename("https://github.com/user/repo/"), "repo");
        assert_eq!(basename("https://github.com/user/repo"), "repo");
    }

    #[tokio::test]
    async fn read_host_git_config_does_not_panic_without_git() {
        // Exercises the happy path against whatever git is on this host;
        // the important property is that it never panics.
        let _ = read_host_git_config().await;
    }
}
