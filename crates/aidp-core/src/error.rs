//! Error kinds, classification, and the crate's public error type.
//!
//! Internal functions use [`anyhow::Result`] with `.context(...)` chains, the
//! same way `gator-core` and `gator-db` do. [`PipelineError`] is the typed
//! boundary returned where a caller needs to match on kind -- retry
//! eligibility (`ErrorKind::is_retryable`) and propagation policy both key
//! off it.

use std::fmt;

use thiserror::Error;

/// A fixed classification of failure, used to decide retry eligibility and
/// whether the self-healing envelope may attempt a diagnose-and-fix cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    UpstreamAuthentication,
    UpstreamNotFound,
    UpstreamConflictAlreadyExists,
    Permission,
    BrokerUnavailable,
    GenerationFailed,
    GenerationTimeout,
    ValidationFailed,
    PushFailed,
    ContainerBuildFailed,
    ContainerRunFailed,
    TunnelRouteFailed,
    StallDetected,
    ConfigCorrupt,
    /// Catch-all for anything not otherwise classified.
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::UpstreamAuthentication => "upstream_authentication",
            Self::UpstreamNotFound => "upstream_not_found",
            Self::UpstreamConflictAlreadyExists => "upstream_conflict_already_exists",
            Self::Permission => "permission",
            Self::BrokerUnavailable => "broker_unavailable",
            Self::GenerationFailed => "generation_failed",
            Self::GenerationTimeout => "generation_timeout",
            Self::ValidationFailed => "validation_failed",
            Self::PushFailed => "push_failed",
            Self::ContainerBuildFailed => "container_build_failed",
            Self::ContainerRunFailed => "container_run_failed",
            Self::TunnelRouteFailed => "tunnel_route_failed",
            Self::StallDetected => "stall_detected",
            Self::ConfigCorrupt => "config_corrupt",
            Self::Generic => "generic",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// Whether an error of this kind is worth retrying through the retry
    /// executor (`retry::with_backoff`).
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::GenerationFailed | Self::GenerationTimeout
        )
    }

    /// Whether the self-healing envelope (`generation::GenerationExecutor`)
    /// may attempt a diagnose-and-fix sub-invocation for this kind.
    ///
    /// Auth failures are excluded: a generation CLI that cannot authenticate
    /// will not be fixed by asking it to fix itself, and doing so burns an
    /// attempt for no benefit.
    pub fn may_self_heal(self) -> bool {
        !matches!(self, Self::UpstreamAuthentication | Self::Permission)
    }
}

/// Classify an error message into an [`ErrorKind`].
///
/// Pure and stateless. Order matters where checks could overlap: rate-limit
/// phrasing is checked before the generic fallback, and authentication
/// phrasing before a bare permission check, mirroring the priority the
/// original Python `ErrorRecoveryManager._recover_github_error` gives these
/// same substrings.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
    {
        return ErrorKind::RateLimited;
    }
    if lower.contains("modulenotfounderror")
        || lower.contains("importerror")
        || lower.contains("cannot find module")
        || lower.contains("no such file or directory")
    {
        return ErrorKind::GenerationFailed;
    }
    if lower.contains("401") || lower.contains("authentication") || lower.contains("unauthorized")
    {
        return ErrorKind::UpstreamAuthentication;
    }
    if lower.contains("permission denied") || lower.contains("403") {
        return ErrorKind::Permission;
    }
    if lower.contains("already exists") {
        return ErrorKind::UpstreamConflictAlreadyExists;
    }
    if lower.contains("404") || lower.contains("not found") {
        return ErrorKind::UpstreamNotFound;
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return ErrorKind::GenerationTimeout;
    }

    ErrorKind::Generic
}

/// The typed error boundary returned by public library functions that need
/// their caller to match on kind. Internal call chains stay in
/// `anyhow::Result` and convert at this boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream provider rate-limited the request")]
    RateLimited,

    #[error("upstream authentication failed")]
    UpstreamAuthentication,

    #[error("upstream resource not found: {0}")]
    UpstreamNotFound(String),

    #[error("generation CLI failed: {0}")]
    GenerationFailed(String),

    #[error("generation CLI timed out after {0:?}")]
    GenerationTimeout(std::time::Duration),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("push to upstream failed: {0}")]
    PushFailed(String),

    #[error("container build failed: {0}")]
    ContainerBuildFailed(String),

    #[error("container run failed: {0}")]
    ContainerRunFailed(String),

    #[error("tunnel route update failed: {0}")]
    TunnelRouteFailed(String),

    #[error("worker stalled: idle since {0:?} ago")]
    StallDetected(std::time::Duration),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("configuration corrupt: {0}")]
    ConfigCorrupt(String),
}

impl PipelineError {
    /// The [`ErrorKind`] this variant corresponds to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited => ErrorKind::RateLimited,
            Self::UpstreamAuthentication => ErrorKind::UpstreamAuthentication,
            Self::UpstreamNotFound(_) => ErrorKind::UpstreamNotFound,
            Self::GenerationFailed(_) => ErrorKind::GenerationFailed,
            Self::GenerationTimeout(_) => ErrorKind::GenerationTimeout,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::PushFailed(_) => ErrorKind::PushFailed,
            Self::ContainerBuildFailed(_) => ErrorKind::ContainerBuildFailed,
            Self::ContainerRunFailed(_) => ErrorKind::ContainerRunFailed,
            Self::TunnelRouteFailed(_) => ErrorKind::TunnelRouteFailed,
            Self::StallDetected(_) => ErrorKind::StallDetected,
            Self::BrokerUnavailable(_) => ErrorKind::BrokerUnavailable,
            Self::ConfigCorrupt(_) => ErrorKind::ConfigCorrupt,
        }
    }
}
