//! Error types for the containers tool.
//!
//! Every fallible path in this crate returns a variant of [`ContainerError`]
//! rather than panicking; the operation dispatcher (see [`crate::tool`])
//! converts these into the `error` field of a response record instead of
//! propagating them to the caller as an exception.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for container tool operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Comprehensive error type for all container tool operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Neither `podman` nor `docker` was found on `PATH`.
    #[error("no container runtime (docker/podman) found on PATH")]
    RuntimeNotFound,

    /// The engine binary is present but the daemon is not reachable.
    #[error("container daemon not accessible: {message}")]
    DaemonNotAccessible {
        /// Details about the connection failure.
        message: String,
    },

    /// The current user lacks permission to talk to the engine socket.
    #[error("permission denied talking to {runtime}: {guidance}")]
    PermissionDenied {
        /// The runtime binary name (`docker` or `podman`).
        runtime: String,
        /// Human-readable remediation, e.g. a `usermod`/`newgrp` hint.
        guidance: String,
    },

    /// A required field was missing from the operation input.
    #[error("missing required field `{field}` for operation `{operation}`")]
    MissingField {
        /// The operation that was requested.
        operation: String,
        /// The field that was required but absent.
        field: String,
    },

    /// Two fields that are mutually exclusive were both supplied.
    #[error("`{a}` and `{b}` are mutually exclusive")]
    MutuallyExclusive {
        /// First field name.
        a: String,
        /// Second field name.
        b: String,
    },

    /// The `operation` value did not match any known operation.
    #[error("unknown operation: {operation}")]
    UnknownOperation {
        /// The operation string that was not recognised.
        operation: String,
    },

    /// The container engine returned a non-zero exit code.
    #[error("command failed (exit {exit_code}): {command}\nstderr: {stderr}")]
    EngineFailed {
        /// The assembled command line, for diagnosis.
        command: String,
        /// Exit code returned by the engine.
        exit_code: i32,
        /// Captured stderr.
        stderr: String,
    },

    /// An engine invocation did not complete within its timeout.
    #[error("command timed out after {timeout:?}: {command}")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// A container create succeeded at the engine level but a later pipeline
    /// step raised before the container could be fully provisioned; the
    /// container and any partial metadata have already been torn down.
    #[error("post-create failure for {name}, container was automatically removed: {reason}")]
    PostCreateFailure {
        /// Name of the container that was rolled back.
        name: String,
        /// What went wrong after creation.
        reason: String,
    },

    /// The safety gate denied the operation outright (not merely asking for
    /// approval).
    #[error("operation denied: {reason}")]
    SafetyDenied {
        /// Why the gate refused.
        reason: String,
    },

    /// No managed container matches the given name.
    #[error("no managed container named {name}")]
    ContainerNotFound {
        /// The container name that was not found.
        name: String,
    },

    /// A named purpose profile does not exist.
    #[error("unknown purpose profile: {purpose}")]
    UnknownPurpose {
        /// The purpose name that was not recognised.
        purpose: String,
    },

    /// Reading or writing the on-disk metadata store failed.
    #[error("metadata store error during {operation}: {source}")]
    Metadata {
        /// The store operation that failed (`save`, `load`, `remove`, ...).
        operation: String,
        #[source]
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// A JSON document the engine or store produced could not be parsed.
    #[error("malformed JSON in {context}: {source}")]
    MalformedJson {
        /// What we were trying to parse.
        context: String,
        #[source]
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Generic IO failure not covered by a more specific variant.
    #[error("IO error during {operation}: {source}")]
    Io {
        /// The operation that caused the IO error.
        operation: String,
        #[source]
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// A container or profile name failed validation.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The invalid name.
        name: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl ContainerError {
    /// Daemon not accessible.
    pub fn daemon_not_accessible(message: impl Into<String>) -> Self {
        Self::DaemonNotAccessible {
            message: message.into(),
        }
    }

    /// Permission denied talking to the engine.
    pub fn permission_denied(runtime: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self::PermissionDenied {
            runtime: runtime.into(),
            guidance: guidance.into(),
        }
    }

    /// Missing required field.
    pub fn missing_field(operation: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            operation: operation.into(),
            field: field.into(),
        }
    }

    /// Mutually exclusive fields both supplied.
    pub fn mutually_exclusive(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self::MutuallyExclusive {
            a: a.into(),
            b: b.into(),
        }
    }

    /// Unknown operation name.
    pub fn unknown_operation(operation: impl Into<String>) -> Self {
        Self::UnknownOperation {
            operation: operation.into(),
        }
    }

    /// Engine invocation returned a non-zero exit code.
    pub fn engine_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::EngineFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Engine invocation timed out.
    pub fn timeout(command: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout,
        }
    }

    /// Post-create rollback occurred.
    pub fn post_create_failure(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PostCreateFailure {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Safety gate denied the request.
    pub fn safety_denied(reason: impl Into<String>) -> Self {
        Self::SafetyDenied {
            reason: reason.into(),
        }
    }

    /// No such managed container.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::ContainerNotFound { name: name.into() }
    }

    /// Unknown purpose profile name.
    pub fn unknown_purpose(purpose: impl Into<String>) -> Self {
        Self::UnknownPurpose {
            purpose: purpose.into(),
        }
    }

    /// Metadata store operation failed.
    pub fn metadata(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Metadata {
            operation: operation.into(),
            source,
        }
    }

    /// JSON parsing failed.
    pub fn malformed_json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::MalformedJson {
            context: context.into(),
            source,
        }
    }

    /// Generic IO error with context.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Invalid name.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation might succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DaemonNotAccessible { .. } | Self::Timeout { .. } | Self::Io { .. }
        )
    }

    /// A short, stable category label for callers that bucket errors without
    /// matching every variant.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::RuntimeNotFound
            | Self::DaemonNotAccessible { .. }
            | Self::PermissionDenied { .. } => "precondition",
            Self::MissingField { .. }
            | Self::MutuallyExclusive { .. }
            | Self::UnknownOperation { .. }
            | Self::UnknownPurpose { .. }
            | Self::InvalidName { .. } => "validation",
            Self::EngineFailed { .. } => "engine",
            Self::Timeout { .. } => "timeout",
            Self::PostCreateFailure { .. } => "post_create",
            Self::SafetyDenied { .. } => "safety",
            Self::ContainerNotFound { .. } => "not_found",
            Self::Metadata { .. } | Self::Io { .. } => "io",
            Self::MalformedJson { .. } => "json",
        }
    }
}

/// Context that can be attached to an error after the fact, for call sites
/// that only learn an identifier once an error has already been built.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Container name, if known.
    pub container: Option<String>,
    /// Image reference, if known.
    pub image: Option<String>,
    /// Network name, if known.
    pub network: Option<String>,
    /// Operation name, if known.
    pub operation: Option<String>,
}

impl ErrorContext {
    /// Start an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a container name.
    #[must_use]
    pub fn with_container(mut self, name: impl Into<String>) -> Self {
        self.container = Some(name.into());
        self
    }

    /// Attach an image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Attach a network name.
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Attach an operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// Extension trait for annotating a [`ContainerResult`] with context without
/// losing the original error.
pub trait ErrorExt<T> {
    /// Log the attached context alongside the error and pass it through.
    fn with_context(self, context: ErrorContext) -> ContainerResult<T>;
}

impl<T> ErrorExt<T> for ContainerResult<T> {
    fn with_context(self, context: ErrorContext) -> ContainerResult<T> {
        self.inspect_err(|err| {
            tracing::warn!(
                container = context.container.as_deref(),
                image = context.image.as_deref(),
                network = context.network.as_deref(),
                operation = context.operation.as_deref(),
                error = %err,
                "operation failed"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_buckets_precondition_errors() {
        assert_eq!(ContainerError::RuntimeNotFound.category(), "precondition");
        assert_eq!(
            ContainerError::daemon_not_accessible("no socket").category(),
            "precondition"
        );
    }

    #[test]
    fn timeout_is_recoverable_but_validation_is_not() {
        let timeout = ContainerError::timeout("docker run", Duration::from_secs(30));
        assert!(timeout.is_recoverable());

        let validation = ContainerError::unknown_operation("frobnicate");
        assert!(!validation.is_recoverable());
        assert_eq!(validation.category(), "validation");
    }

    #[test]
    fn safety_denied_is_not_recoverable() {
        let denied = ContainerError::safety_denied("container limit reached");
        assert!(!denied.is_recoverable());
        assert_eq!(denied.category(), "safety");
    }

    #[test]
    fn error_context_builder() {
        let ctx = ErrorContext::new()
            .with_container("amp-python-abc123")
            .with_operation("create");
        assert_eq!(ctx.container.as_deref(), Some("amp-python-abc123"));
        assert_eq!(ctx.operation.as_deref(), Some("create"));
        assert!(ctx.image.is_none());
    }
}
