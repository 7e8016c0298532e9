//! Runtime configuration for the orchestration substrate.
//!
//! Mirrors the `DbConfig`/`BrokerConfig::from_env` shape: a `DEFAULT_*`
//! constant per field, an explicit constructor for tests and CLI flags, and
//! `from_env`/`Default` reading the process environment. The CLI layer
//! (`aidp-cli::config`) additionally layers a TOML config file on top of
//! this via the chain CLI flag > env var > config file > default.

use std::env;
use std::time::Duration;

/// Fully resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub redis_url: String,
    pub generation_cli_path: String,
    pub workspace_root: std::path::PathBuf,
    pub worker_poll_interval: Duration,
    pub monitor_poll_interval: Duration,
    pub worker_stall_threshold: Duration,
    pub ci_max_fix_attempts: u32,
    pub deployment_domain: String,
    pub deployment_port_range_start: u16,
    pub container_image_prefix: String,
    pub port_allocations_path: std::path::PathBuf,
    pub ingress_config_path: std::path::PathBuf,
    pub tunnel_name: String,
}

impl PipelineConfig {
    pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
    pub const DEFAULT_GENERATION_CLI_PATH: &str = "claude";
    pub const DEFAULT_WORKER_POLL_SECS: u64 = 10;
    pub const DEFAULT_MONITOR_POLL_SECS: u64 = 30;
    pub const DEFAULT_STALL_MINUTES: u64 = 10;
    pub const DEFAULT_CI_MAX_FIX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DEPLOYMENT_DOMAIN: &str = "example.com";
    pub const DEFAULT_PORT_RANGE_START: u16 = 4000;
    pub const DEFAULT_CONTAINER_IMAGE_PREFIX: &str = "aidp";
    pub const DEFAULT_TUNNEL_NAME: &str = "aidp";

    /// Build config from the environment, falling back to documented
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("AIDP_REDIS_URL")
                .unwrap_or_else(|_| Self::DEFAULT_REDIS_URL.to_owned()),
            generation_cli_path: env::var("AIDP_GENERATION_CLI_PATH")
                .unwrap_or_else(|_| Self::DEFAULT_GENERATION_CLI_PATH.to_owned()),
            workspace_root: env::var("AIDP_WORKSPACE_ROOT")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| default_workspace_root()),
            worker_poll_interval: Duration::from_secs(
                env_u64("AIDP_WORKER_POLL_INTERVAL_SECS", Self::DEFAULT_WORKER_POLL_SECS),
            ),
            monitor_poll_interval: Duration::from_secs(env_u64(
                "MONITOR_POLL_INTERVAL",
                Self::DEFAULT_MONITOR_POLL_SECS,
            )),
            worker_stall_threshold: Duration::from_secs(
                env_u64("WORKER_STALL_MINUTES", Self::DEFAULT_STALL_MINUTES) * 60,
            ),
            ci_max_fix_attempts: env_u64(
                "MAX_FIX_ATTEMPTS",
                Self::DEFAULT_CI_MAX_FIX_ATTEMPTS as u64,
            ) as u32,
            deployment_domain: env::var("AIDP_DEPLOYMENT_DOMAIN")
                .unwrap_or_else(|_| Self::DEFAULT_DEPLOYMENT_DOMAIN.to_owned()),
            deployment_port_range_start: env_u64(
                "AIDP_PORT_RANGE_START",
                Self::DEFAULT_PORT_RANGE_START as u64,
            ) as u16,
            container_image_prefix: env::var("AIDP_CONTAINER_IMAGE_PREFIX")
                .unwrap_or_else(|_| Self::DEFAULT_CONTAINER_IMAGE_PREFIX.to_owned()),
            port_allocations_path: env::var("AIDP_PORT_ALLOCATIONS_PATH")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| default_pipeline_home().join("port_allocations.json")),
            ingress_config_path: env::var("AIDP_INGRESS_CONFIG_PATH")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| default_cloudflared_home().join("config.yml")),
            tunnel_name: env::var("AIDP_TUNNEL_NAME")
                .unwrap_or_else(|_| Self::DEFAULT_TUNNEL_NAME.to_owned()),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_pipeline_home() -> std::path::PathBuf {
    dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(".ai-dev-pipeline")
}

fn default_workspace_root() -> std::path::PathBuf {
    default_pipeline_home().join("workspaces")
}

fn default_cloudflared_home() -> std::path::PathBuf {
    dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(".cloudflared")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_source_constants() {
        // MONITOR_POLL_INTERVAL=30, MAX_FIX_ATTEMPTS=3, WORKER_STALL_MINUTES=10
        // per original_source/agents/pipeline_monitor.py.
        assert_eq!(PipelineConfig::DEFAULT_MONITOR_POLL_SECS, 30);
        assert_eq!(PipelineConfig::DEFAULT_CI_MAX_FIX_ATTEMPTS, 3);
        assert_eq!(PipelineConfig::DEFAULT_STALL_MINUTES, 10);
    }

    #[test]
    fn env_u64_falls_back_on_missing_or_invalid() {
        assert_eq!(env_u64("AIDP_TEST_DOES_NOT_EXIST_XYZ", 99), 99);
    }
}
