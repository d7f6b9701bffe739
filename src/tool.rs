//! Operation dispatch surface: the single `containers` tool entry point
//! fanning out to every typed handler (SPEC_FULL.md §6), plus the three
//! Safety Gate hook functions a host wires into whatever hook bus it has.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::compose;
use crate::config::ToolConfig;
use crate::errors::ContainerError;
use crate::exec;
use crate::lifecycle;
use crate::metadata::MetadataStore;
use crate::pipeline;
use crate::preflight;
use crate::runtime::RuntimeAdapter;
use crate::safety::{self, ApprovalOutcome, PostOpOutcome, PreOpContext, SafetySessionState};
use crate::types::{BackgroundJobHandle, CreateRequest};

/// The `containers` tool: owns the Runtime Adapter, Metadata Store, and
/// per-process Safety Session State for one host process.
pub struct ContainersTool {
    runtime: RuntimeAdapter,
    config: ToolConfig,
    store: MetadataStore,
    session: SafetySessionState,
}

impl ContainersTool {
    /// Build a tool instance. Fails only if the Metadata Store can't
    /// resolve a home directory or `config` fails validation.
    pub fn new(config: ToolConfig) -> crate::errors::ContainerResult<Self> {
        config.validate()?;
        let runtime = match &config.engine_binary_path {
            Some(path) => RuntimeAdapter::with_binary_path(path.clone()),
            None => RuntimeAdapter::new(),
        };
        Ok(Self {
            runtime,
            config,
            store: MetadataStore::new()?,
            session: SafetySessionState::new(),
        })
    }

    /// Dispatch one `{operation, ...}` request and return a plain JSON
    /// response record. Failures are represented as `{"error": "..."}`
    /// rather than propagated — the only escape hatch left is a genuinely
    /// unknown `operation` string, also returned as an error record.
    pub async fn dispatch(&self, operation: &str, input: Value) -> Value {
        let result = self.dispatch_inner(operation, input).await;
        match result {
            Ok(value) => value,
            Err(e) => json!({ "success": false, "error": e.to_string(), "category": e.category() }),
        }
    }

    async fn dispatch_inner(
        &self,
        operation: &str,
        input: Value,
    ) -> crate::errors::ContainerResult<Value> {
        match operation {
            "preflight" => {
                let report = preflight::run(&self.runtime, self.config.timeouts.probe).await;
                Ok(serde_json::to_value(report).unwrap())
            }
            "create" => self.handle_create(input).await,
            "exec" => self.handle_exec(input).await,
            "exec_interactive_hint" => self.handle_exec_interactive_hint(input).await,
            "exec_background" => self.handle_exec_background(input).await,
            "exec_poll" => self.handle_exec_poll(input).await,
            "exec_cancel" => self.handle_exec_cancel(input).await,
            "wait_healthy" => self.handle_wait_healthy(input).await,
            "list" => {
                let names = lifecycle::list(&self.runtime, self.config.timeouts.probe).await;
                Ok(json!({ "success": true, "containers": names }))
            }
            "status" => self.handle_status(input).await,
            "destroy" => self.handle_destroy(input).await,
            "destroy_all" => self.handle_destroy_all(input).await,
            "copy_in" => self.handle_copy_in(input).await,
            "copy_out" => self.handle_copy_out(input).await,
            "snapshot" => self.handle_snapshot(input).await,
            "restore" => self.handle_restore(input).await,
            "create_network" => self.handle_create_network(input).await,
            "destroy_network" => self.handle_destroy_network(input).await,
            "cache_clear" => self.handle_cache_clear(input).await,
            other => Err(ContainerError::unknown_operation(other)),
        }
    }

    async fn handle_create(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        let request: CreateRequest = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("create input", e))?;

        let ctx = PreOpContext {
            operation: "create".to_string(),
            gpu: request.gpu,
            network: Some(request.network.clone()),
            mount_hosts: request.mounts.iter().map(|m| m.host.clone()).collect(),
            forward_ssh: request.forward_ssh.unwrap_or(false),
            all_env_passthrough: matches!(request.env_passthrough, crate::types::EnvPassthroughMode::All),
            destroy_all_confirm: false,
        };
        if let ApprovalOutcome::Deny { reason } = safety::handle_tool_pre(&self.config, &self.session, &ctx) {
            return Err(ContainerError::safety_denied(reason));
        }

        let host_env: HashMap<String, String> = std::env::vars().collect();
        let response = pipeline::create(&self.runtime, &self.config, &self.store, request, &host_env).await?;
        safety::handle_tool_post(&self.session, PostOpOutcome::Created(response.name.clone()));
        Ok(serde_json::to_value(response).unwrap())
    }

    async fn handle_exec(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct ExecInput {
            container: String,
            command: String,
            #[serde(default)]
            exec_user: Option<String>,
            #[serde(default)]
            as_root: bool,
            #[serde(default)]
            timeout_secs: Option<u64>,
        }
        let req: ExecInput =
            serde_json::from_value(input).map_err(|e| ContainerError::malformed_json("exec input", e))?;
        let timeout = req.timeout_secs.map(Duration::from_secs);
        let result = exec::exec(
            &self.runtime,
            &req.container,
            &req.command,
            req.exec_user.as_deref(),
            req.as_root,
            timeout,
        )
        .await;
        Ok(json!({
            "success": result.success(),
            "exit_code": result.exit_code,
            "stdout": result.stdout,
            "stderr": result.stderr,
            "timed_out": result.timed_out(),
        }))
    }

    async fn handle_exec_interactive_hint(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            #[serde(default)]
            exec_user: Option<String>,
            #[serde(default)]
            as_root: bool,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("exec_interactive_hint input", e))?;
        let hint = exec::exec_interactive_hint(
            &self.runtime,
            &req.container,
            req.exec_user.as_deref(),
            req.as_root,
            self.config.timeouts.probe,
        )
        .await;
        Ok(json!({ "success": true, "command": hint }))
    }

    async fn handle_exec_background(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            command: String,
            #[serde(default)]
            exec_user: Option<String>,
            #[serde(default)]
            as_root: bool,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("exec_background input", e))?;
        match exec::exec_background(
            &self.runtime,
            &req.container,
            &req.command,
            req.exec_user.as_deref(),
            req.as_root,
            self.config.timeouts.probe,
        )
        .await
        {
            Ok(handle) => Ok(serde_json::to_value(JobHandleView::from(&handle)).unwrap()),
            Err(result) => Err(ContainerError::engine_failed(
                "exec_background launch",
                result.exit_code,
                result.stderr,
            )),
        }
    }

    async fn handle_exec_poll(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        let handle = parse_job_handle(input)?;
        let status = exec::exec_poll(&self.runtime, &handle, self.config.timeouts.probe).await;
        Ok(serde_json::to_value(status).unwrap())
    }

    async fn handle_exec_cancel(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        let handle = parse_job_handle(input)?;
        let cancelled = exec::exec_cancel(&self.runtime, &handle, self.config.timeouts.probe).await;
        Ok(json!({ "success": cancelled }))
    }

    async fn handle_wait_healthy(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            health_command: String,
            #[serde(default = "default_retries")]
            retries: u32,
            #[serde(default = "default_interval_secs")]
            interval_secs: u64,
        }
        fn default_retries() -> u32 {
            5
        }
        fn default_interval_secs() -> u64 {
            3
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("wait_healthy input", e))?;
        let result = exec::wait_healthy(
            &self.runtime,
            &req.container,
            &req.health_command,
            req.retries,
            Duration::from_secs(req.interval_secs),
        )
        .await;
        Ok(serde_json::to_value(result).unwrap())
    }

    async fn handle_status(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("status input", e))?;
        let (record, running) = lifecycle::status(&self.runtime, &self.store, &req.container, self.config.timeouts.probe).await?;
        Ok(json!({ "success": true, "running": running, "record": record }))
    }

    async fn handle_destroy(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            #[serde(default)]
            force: bool,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("destroy input", e))?;
        lifecycle::destroy(
            &self.runtime,
            &self.store,
            &req.container,
            req.force,
            self.config.timeouts.probe,
            self.config.timeouts.compose_down,
        )
        .await?;
        safety::handle_tool_post(&self.session, PostOpOutcome::Destroyed(req.container.clone()));
        Ok(json!({ "success": true, "name": req.container }))
    }

    async fn handle_destroy_all(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize, Default)]
        struct Input {
            #[serde(default)]
            confirm: bool,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("destroy_all input", e))?;

        let ctx = PreOpContext {
            operation: "destroy_all".to_string(),
            destroy_all_confirm: req.confirm,
            ..Default::default()
        };
        if let ApprovalOutcome::Deny { reason } = safety::handle_tool_pre(&self.config, &self.session, &ctx) {
            return Err(ContainerError::safety_denied(reason));
        }

        let destroyed = lifecycle::destroy_all(
            &self.runtime,
            &self.store,
            req.confirm,
            self.config.timeouts.probe,
            self.config.timeouts.compose_down,
        )
        .await?;
        safety::handle_tool_post(&self.session, PostOpOutcome::DestroyedAll);
        Ok(json!({ "success": true, "destroyed": destroyed }))
    }

    async fn handle_copy_in(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            host_path: String,
            container_path: String,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("copy_in input", e))?;
        lifecycle::copy_in(
            &self.runtime,
            &req.container,
            &req.host_path,
            &req.container_path,
            self.config.timeouts.clone_or_copy,
        )
        .await?;
        Ok(json!({ "success": true }))
    }

    async fn handle_copy_out(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            container_path: String,
            host_path: String,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("copy_out input", e))?;
        lifecycle::copy_out(
            &self.runtime,
            &req.container,
            &req.container_path,
            &req.host_path,
            self.config.timeouts.clone_or_copy,
        )
        .await?;
        Ok(json!({ "success": true }))
    }

    async fn handle_snapshot(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            name: String,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("snapshot input", e))?;
        let tag = lifecycle::snapshot(&self.runtime, &req.container, &req.name, self.config.timeouts.run_or_commit).await?;
        Ok(json!({ "success": true, "image": tag }))
    }

    async fn handle_restore(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            name: String,
            #[serde(flatten)]
            request: CreateRequest,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("restore input", e))?;
        let mut request = req.request;
        request.image = Some(lifecycle::restore_image(&req.name));
        request.purpose = None;
        self.handle_create(serde_json::to_value(request).unwrap()).await
    }

    async fn handle_create_network(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            name: String,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("create_network input", e))?;
        lifecycle::create_network(&self.runtime, &req.name, self.config.timeouts.probe).await?;
        Ok(json!({ "success": true, "name": req.name }))
    }

    async fn handle_destroy_network(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize)]
        struct Input {
            name: String,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("destroy_network input", e))?;
        lifecycle::destroy_network(&self.runtime, &req.name, self.config.timeouts.probe).await?;
        Ok(json!({ "success": true }))
    }

    async fn handle_cache_clear(&self, input: Value) -> crate::errors::ContainerResult<Value> {
        #[derive(Deserialize, Default)]
        struct Input {
            #[serde(default)]
            purpose: Option<String>,
        }
        let req: Input = serde_json::from_value(input)
            .map_err(|e| ContainerError::malformed_json("cache_clear input", e))?;
        let removed = lifecycle::cache_clear(&self.runtime, req.purpose.as_deref(), self.config.timeouts.run_or_commit).await;
        Ok(json!({ "success": true, "removed": removed }))
    }

    /// Announce containers the caller should clean up. Does not destroy.
    #[must_use]
    pub fn session_end(&self) -> Vec<String> {
        safety::handle_session_end(&self.session)
    }

    /// Whether `compose` is usable on the detected engine.
    pub async fn compose_available(&self) -> bool {
        compose::is_available(&self.runtime, self.config.timeouts.probe).await
    }
}

#[derive(Debug, Serialize)]
struct JobHandleView {
    job_id: String,
    container: String,
    launcher_pid: u32,
}

impl From<&BackgroundJobHandle> for JobHandleView {
    fn from(h: &BackgroundJobHandle) -> Self {
        Self {
            job_id: h.job_id.clone(),
            container: h.container.clone(),
            launcher_pid: h.launcher_pid,
        }
    }
}

fn parse_job_handle(input: Value) -> crate::errors::ContainerResult<BackgroundJobHandle> {
    #[derive(Deserialize)]
    struct Input {
        job_id: String,
        container: String,
        launcher_pid: u32,
    }
    let req: Input =
        serde_json::from_value(input).map_err(|e| ContainerError::malformed_json("job handle input", e))?;
    Ok(BackgroundJobHandle {
        job_id: req.job_id,
        container: req.container,
        launcher_pid: req.launcher_pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_operation_is_returned_inline_not_panicked() {
        let tool = ContainersTool::new(ToolConfig::default()).unwrap();
        let response = tool.dispatch("frobnicate", json!({})).await;
        assert_eq!(response["success"], json!(false));
        assert!(response["error"].as_str().unwrap().contains("frobnicate"));
    }

    #[tokio::test]
    async fn malformed_create_input_is_returned_inline() {
        let tool = ContainersTool::new(ToolConfig::default()).unwrap();
        let response = tool.dispatch("create", json!({ "ports": "not-an-array" })).await;
        assert_eq!(response["success"], json!(false));
    }

    #[tokio::test]
    async fn list_never_errors_even_without_an_engine() {
        let mut config = ToolConfig::default();
        config.engine_binary_path = Some("/definitely/not/a/real/binary".into());
        let tool = ContainersTool::new(config).unwrap();
        let response = tool.dispatch("list", json!({})).await;
        assert_eq!(response["success"], json!(true));
    }

    #[tokio::test]
    async fn destroy_all_without_confirm_is_denied_inline() {
        let tool = ContainersTool::new(ToolConfig::default()).unwrap();
        let response = tool.dispatch("destroy_all", json!({ "confirm": false })).await;
        assert_eq!(response["success"], json!(false));
    }
}
