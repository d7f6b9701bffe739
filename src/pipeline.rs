//! Creation Pipeline: the ordered `create()` orchestration tying every
//! other component together (SPEC_FULL.md §4.I).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{self, CacheLookup};
use crate::compose;
use crate::config::ToolConfig;
use crate::env_passthrough;
use crate::errors::{ContainerError, ContainerResult};
use crate::metadata::MetadataStore;
use crate::profile;
use crate::provisioner;
use crate::repo_detector;
use crate::runtime::{EngineKind, RuntimeAdapter};
use crate::types::{
    ContainerName, ContainerRecord, CreateRequest, ProvisioningFlags, ProvisioningStep,
};
use crate::utils::{generate_container_name, random_hex};

/// Host path every SSH-forwarding bind mount stages keys at, read-only,
/// inside the container. Shared between the argument builder here and
/// [`provisioner::provision_ssh`].
const SSH_STAGING_PATH: &str = "/tmp/.host-ssh";

/// The shell loop every created container runs as its entrypoint, so it
/// idles forever even on minimal images lacking `coreutils`' long-form
/// `sleep infinity`.
const IDLE_COMMAND: &str = "while true; do sleep 3600; done";

/// Response returned by a successful `create`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateResponse {
    /// Always `true` for a value of this type (errors return `Err` instead).
    pub success: bool,
    /// The container's name.
    pub name: String,
    /// Engine-assigned container id.
    pub container_id: String,
    /// Image the container was created from.
    pub image: String,
    /// Purpose profile used, if any.
    pub purpose: Option<String>,
    /// A human-friendly hint for connecting to the container.
    pub connect_command: String,
    /// Effective working directory.
    pub workdir: String,
    /// Number of environment variables set at creation.
    pub env_var_count: usize,
    /// Whether a cached image was used instead of installing packages.
    pub cache_used: bool,
    /// The full provisioning report, in execution order.
    pub provisioning: Vec<ProvisioningStep>,
}

struct ComposeTempFileGuard(Option<PathBuf>);

impl Drop for ComposeTempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn host_uid_gid() -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    let cwd = std::env::current_dir().ok()?;
    let meta = std::fs::metadata(cwd).ok()?;
    Some((meta.uid(), meta.gid()))
}

fn build_run_args(
    config: &ToolConfig,
    name: &str,
    image: &str,
    workdir: &str,
    request: &CreateRequest,
    network: &str,
    env: &HashMap<String, String>,
    purpose: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), name.to_string()];
    args.push("--security-opt=no-new-privileges".to_string());
    args.push(format!("--memory={}", request.memory_limit));
    args.push(format!("--pids-limit={}", config.security.pids_limit));

    if let Some(cpu) = &request.cpu_limit {
        args.push(format!("--cpus={cpu}"));
    }
    if request.gpu {
        args.push("--gpus".to_string());
        args.push("all".to_string());
    }

    args.push("--network".to_string());
    args.push(network.to_string());

    if request.mount_cwd {
        if let Ok(cwd) = std::env::current_dir() {
            args.push("-v".to_string());
            args.push(format!("{}:{}", cwd.display(), workdir));
        }
    }
    for mount in &request.mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}:{}", mount.host, mount.container, mount.mode));
    }
    if request.forward_ssh.unwrap_or(false) {
        if let Some(home) = dirs::home_dir() {
            args.push("-v".to_string());
            args.push(format!("{}:{}:ro", home.join(".ssh").display(), SSH_STAGING_PATH));
        }
    }

    for port in &request.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port.host, port.container));
    }

    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push("--label".to_string());
    args.push("amplifier.managed=true".to_string());
    args.push("--label".to_string());
    args.push("amplifier.bundle=containers".to_string());
    args.push("--label".to_string());
    args.push(format!("amplifier.created={}", chrono::Utc::now().to_rfc3339()));
    args.push("--label".to_string());
    args.push(format!("amplifier.persistent={}", request.persistent));
    args.push("--label".to_string());
    args.push(format!("amplifier.purpose={}", purpose.unwrap_or("none")));
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(image.to_string());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(IDLE_COMMAND.to_string());

    args
}

/// Run the full Creation Pipeline against an already-validated,
/// already-gated request.
pub async fn create(
    runtime: &RuntimeAdapter,
    config: &ToolConfig,
    store: &MetadataStore,
    mut request: CreateRequest,
    host_env: &HashMap<String, String>,
) -> ContainerResult<CreateResponse> {
    request.validate()?;

    // Step 1: Compose.
    let mut compose_project = None;
    let mut compose_file_path = None;
    let mut compose_network = None;
    let compose_guard;
    if request.compose_content.is_some() || request.compose_file.is_some() {
        let project = request
            .name
            .clone()
            .unwrap_or_else(|| format!("amp-compose-{}", random_hex(6)));

        let file = if let Some(content) = &request.compose_content {
            let path = std::env::temp_dir().join(format!("amp-compose-{project}-{}.yml", random_hex(6)));
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| ContainerError::io("write compose file", e))?;
            compose_guard = ComposeTempFileGuard(Some(path.clone()));
            path.to_string_lossy().into_owned()
        } else {
            compose_guard = ComposeTempFileGuard(None);
            request.compose_file.clone().unwrap()
        };

        compose::up(runtime, &file, &project, config.timeouts.compose_up).await?;
        compose_network = compose::get_network_name(runtime, &project, config.timeouts.probe).await;
        compose_file_path = Some(file);
        compose_project = Some(project);
    } else {
        compose_guard = ComposeTempFileGuard(None);
    }

    // Step 2: try-repo detection.
    let mut prepended_commands = Vec::new();
    if request.purpose.as_deref() == Some("try-repo") {
        let url = request.repo_url.clone().unwrap_or_default();
        let (detected_purpose, hints) = repo_detector::detect(&url).await;
        request.purpose = Some(detected_purpose);
        prepended_commands.push(format!("git clone {url} /workspace/repo"));
        prepended_commands.extend(hints);
    }

    // Step 3: resolve the purpose profile.
    let purpose_name = request.purpose.clone();
    let profile_struct = purpose_name.as_deref().and_then(profile::lookup);
    let (mut request, resolved_setup) = match &purpose_name {
        Some(p) => profile::resolve(p, request),
        None => (request, profile::ResolvedSetup::default()),
    };

    // Step 4: Image Cache lookup.
    let mut image = request
        .image
        .clone()
        .unwrap_or_else(|| config.default_image.clone());
    let mut cache_used = false;
    let mut user_commands = prepended_commands.clone();
    user_commands.extend(resolved_setup.user_commands.clone());
    let mut effective_commands = prepended_commands.clone();
    effective_commands.extend(resolved_setup.profile_commands.clone());
    effective_commands.extend(resolved_setup.user_commands.clone());

    if !request.cache_bust {
        if let (Some(purpose), Some(profile)) = (&purpose_name, &profile_struct) {
            let digest = profile.digest();
            if let CacheLookup::Hit { image: cached_image } =
                cache::lookup(runtime, purpose, &digest, config.timeouts.probe).await
            {
                image = cached_image;
                cache_used = true;
                effective_commands = user_commands.clone();
            }
        }
    }

    // Step 5: name + phantom-workdir fix.
    let name = request
        .name
        .clone()
        .unwrap_or_else(|| generate_container_name(purpose_name.as_deref().unwrap_or("container")));
    ContainerName::new(&name)?;

    let mut workdir = request.workdir.clone();
    if workdir == "/workspace" && !request.mount_cwd {
        workdir = "/root".to_string();
    }

    // Step 6: build engine arguments.
    let network_name = compose_network.clone().unwrap_or_else(|| request.network.clone());
    let passthrough = env_passthrough::resolve(
        &request.env_passthrough,
        host_env,
        &config.auto_passthrough.env_patterns,
    );
    let mut env = env_passthrough::merge_with_explicit(passthrough, &request.env);

    let forward_gh = request.forward_gh.unwrap_or(false);
    if forward_gh {
        if let Some(token) = provisioner::read_host_gh_token().await {
            env.entry("GH_TOKEN".to_string()).or_insert_with(|| token.clone());
            env.entry("GITHUB_TOKEN".to_string()).or_insert(token);
        }
    }

    let run_args = build_run_args(
        config,
        &name,
        &image,
        &workdir,
        &request,
        &network_name,
        &env,
        purpose_name.as_deref(),
    );
    let arg_refs: Vec<&str> = run_args.iter().map(String::as_str).collect();

    // Step 7: invoke the engine.
    let result = runtime.run(&arg_refs, config.timeouts.run_or_commit).await;
    if !result.success() {
        runtime.run(&["rm", "-f", &name], config.timeouts.probe).await;
        return Err(ContainerError::engine_failed(
            arg_refs.join(" "),
            result.exit_code,
            result.stderr,
        ));
    }
    let container_id = result.stdout.trim().chars().take(12).collect::<String>();

    info!(name, %container_id, image, "container created");

    match finish_provisioning(
        runtime,
        config,
        store,
        &request,
        &name,
        &container_id,
        &image,
        purpose_name.as_deref(),
        &workdir,
        &effective_commands,
        &env,
        cache_used,
        profile_struct.as_ref(),
        compose_project,
        compose_file_path,
        compose_network,
    )
    .await
    {
        Ok(response) => {
            drop(compose_guard);
            Ok(response)
        }
        Err(e) => {
            warn!(name, error = %e, "post-create step failed, rolling back container");
            runtime.run(&["stop", &name], config.timeouts.probe).await;
            runtime.run(&["rm", "-f", &name], config.timeouts.probe).await;
            let _ = store.remove(&name).await;
            drop(compose_guard);
            Err(ContainerError::post_create_failure(name, e.to_string()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_provisioning(
    runtime: &RuntimeAdapter,
    config: &ToolConfig,
    store: &MetadataStore,
    request: &CreateRequest,
    name: &str,
    container_id: &str,
    image: &str,
    purpose: Option<&str>,
    workdir: &str,
    setup_commands: &[String],
    env: &HashMap<String, String>,
    cache_used: bool,
    profile: Option<&crate::types::PurposeProfile>,
    compose_project: Option<String>,
    compose_file: Option<String>,
    compose_network: Option<String>,
) -> ContainerResult<CreateResponse> {
    let env_var_count = env.len();

    // Step 8: two-phase user ownership.
    let mapped_user = if request.mount_cwd && !request.as_root {
        host_uid_gid()
    } else {
        None
    };
    if let Some((uid, gid)) = mapped_user {
        provisioner::map_host_user(runtime, name, uid, gid, config.timeouts.probe).await;
    }
    let exec_user = mapped_user.map(|(uid, gid)| format!("{uid}:{gid}"));

    // Step 9: provisioning steps, in declared order.
    let mut provisioning = Vec::new();
    provisioning.push(ProvisioningStep::success(
        "env_passthrough",
        format!("resolved {env_var_count} environment variable(s)"),
    ));

    let home = provisioner::target_home(runtime, name, config.timeouts.probe).await;

    provisioning.push(if request.forward_git.unwrap_or(false) {
        provisioner::provision_git(runtime, name, &home, config.timeouts.probe).await
    } else {
        ProvisioningStep::skipped("forward_git", "not requested")
    });

    provisioning.push(if request.forward_gh.unwrap_or(false) {
        provisioner::provision_gh(runtime, name, config.timeouts.probe).await
    } else {
        ProvisioningStep::skipped("forward_gh", "not requested")
    });

    provisioning.push(if request.forward_ssh.unwrap_or(false) {
        provisioner::provision_ssh(runtime, name, &home, SSH_STAGING_PATH, config.timeouts.clone_or_copy).await
    } else {
        ProvisioningStep::skipped("forward_ssh", "not requested")
    });

    provisioning.push({
        let spec = provisioner::DotfilesSpec {
            skip: request.dotfiles_skip,
            repo: request.dotfiles_repo.clone().or_else(|| config.dotfiles.repo.clone()),
            branch: request.dotfiles_branch.clone(),
            inline: request.dotfiles_inline.clone(),
        };
        provisioner::provision_dotfiles(
            runtime,
            name,
            &home,
            &spec,
            config.timeouts.clone_or_copy,
            config.timeouts.setup_command,
        )
        .await
    });

    provisioning.push(
        provisioner::provision_repos(
            runtime,
            name,
            &request.repos,
            workdir,
            config.timeouts.clone_or_copy,
            config.timeouts.setup_command,
        )
        .await,
    );

    provisioning.push(
        provisioner::provision_config_files(runtime, name, &request.config_files, config.timeouts.clone_or_copy)
            .await,
    );

    if purpose == Some("amplifier") {
        provisioning.push(
            provisioner::provision_amplifier_settings(runtime, name, &home, config.timeouts.clone_or_copy).await,
        );
    }

    let setup_step =
        provisioner::run_setup_commands(runtime, name, setup_commands, config.timeouts.setup_command).await;
    let setup_status = setup_step.status;
    provisioning.push(setup_step);

    // Step 10: fix workspace ownership.
    if let Some((uid, gid)) = mapped_user {
        provisioner::fix_ownership(runtime, name, uid, gid, workdir, config.timeouts.probe).await;
    }

    // Step 11: compose summary.
    if let Some(project) = &compose_project {
        let services = compose::ps(runtime, project, config.timeouts.probe).await;
        provisioning.push(ProvisioningStep::success(
            "compose",
            format!("{} service(s) observed in project {project}", services.len()),
        ));
    }

    // Step 12: persist the Container Record.
    let record = ContainerRecord {
        name: name.to_string(),
        container_id: container_id.to_string(),
        image: image.to_string(),
        purpose: purpose.map(str::to_string),
        created: chrono::Utc::now(),
        persistent: request.persistent,
        mounts: request.mounts.clone(),
        mount_cwd: request.mount_cwd,
        ports: request.ports.clone(),
        env_keys: {
            let mut keys: Vec<String> = env.keys().cloned().collect();
            keys.sort();
            keys
        },
        exec_user: exec_user.clone(),
        compose_project,
        compose_file,
        compose_network,
        provisioning: ProvisioningFlags {
            forward_git: request.forward_git.unwrap_or(false),
            forward_gh: request.forward_gh.unwrap_or(false),
            forward_ssh: request.forward_ssh.unwrap_or(false),
            dotfiles_enabled: !request.dotfiles_skip,
        },
    };
    store.save(&record).await?;

    // Step 13: commit to the Image Cache.
    use crate::types::StepStatus;
    if !cache_used
        && !request.cache_bust
        && matches!(setup_status, StepStatus::Success | StepStatus::Skipped)
    {
        if let (Some(purpose_name), Some(profile)) = (purpose, profile) {
            cache::commit(runtime, name, purpose_name, &profile.digest(), config.timeouts.run_or_commit).await;
        }
    }

    // Step 14: assemble the response.
    let engine_bin = runtime.engine_kind().map_or("docker", EngineKind::binary_name);
    let connect_command = if let Some(user) = &exec_user {
        format!("{engine_bin} exec -it --user {user} {name} sh")
    } else {
        format!("{engine_bin} exec -it {name} sh")
    };

    Ok(CreateResponse {
        success: true,
        name: name.to_string(),
        container_id: container_id.to_string(),
        image: image.to_string(),
        purpose: purpose.map(str::to_string),
        connect_command,
        workdir: workdir.to_string(),
        env_var_count,
        cache_used,
        provisioning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phantom_workdir_falls_back_to_root_without_a_cwd_mount() {
        let mut workdir = "/workspace".to_string();
        let mount_cwd = false;
        if workdir == "/workspace" && !mount_cwd {
            workdir = "/root".to_string();
        }
        assert_eq!(workdir, "/root");
    }

    #[test]
    fn build_run_args_includes_mandatory_hardening_flags() {
        let config = ToolConfig::default();
        let request = CreateRequest::default();
        let env = HashMap::new();
        let args = build_run_args(&config, "amp-test-abc123", "ubuntu:24.04", "/workspace", &request, "bridge", &env, None);
        assert!(args.contains(&"--security-opt=no-new-privileges".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--memory=")));
        assert!(args.iter().any(|a| a.starts_with("--pids-limit=")));
        assert!(args.iter().any(|a| a == "amp-test-abc123" || a.contains("amp-test-abc123")));
        assert_eq!(args.last().unwrap(), IDLE_COMMAND);
    }

    #[test]
    fn build_run_args_adds_gpu_flag_only_when_requested() {
        let config = ToolConfig::default();
        let mut request = CreateRequest::default();
        request.gpu = true;
        let env = HashMap::new();
        let args = build_run_args(&config, "n", "i", "/workspace", &request, "bridge", &env, None);
        assert!(args.windows(2).any(|w| w == ["--gpus", "all"]));
    }

    #[test]
    fn compose_temp_file_guard_deletes_on_drop() {
        let path = std::env::temp_dir().join(format!("amp-compose-test-{}.yml", random_hex(6)));
        std::fs::write(&path, "services: {}").unwrap();
        {
            let _guard = ComposeTempFileGuard(Some(path.clone()));
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
