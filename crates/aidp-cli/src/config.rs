//! Configuration file management for the pipeline CLI.
//!
//! Provides a TOML config file at `~/.ai-dev-pipeline/config.toml` and a
//! resolution chain per field: CLI flag > env var > config file > compiled
//! default, mirroring the teacher's `GatorConfig::resolve`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use aidp_core::config::PipelineConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub redis_url: Option<String>,
    pub github_token: Option<String>,
    pub generation_cli_path: Option<String>,
    pub workspace_root: Option<String>,
    pub worker_poll_interval_secs: Option<u64>,
    pub monitor_poll_interval_secs: Option<u64>,
    pub worker_stall_minutes: Option<u64>,
    pub ci_max_fix_attempts: Option<u32>,
    pub deployment_domain: Option<String>,
    pub deployment_port_range_start: Option<u16>,
    pub container_image_prefix: Option<String>,
    pub port_allocations_path: Option<String>,
    pub ingress_config_path: Option<String>,
    pub tunnel_name: Option<String>,
    pub development_branch: Option<String>,
}

pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ai-dev-pipeline");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".ai-dev-pipeline")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents).with_context(|| format!("failed to write config file at {}", path.display()))
}

/// CLI-flag overrides. Only the handful of fields users actually reach for
/// on the command line; everything else flows through env var / file /
/// default.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub redis_url: Option<String>,
    pub github_token: Option<String>,
}

/// Fully resolved configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub pipeline: PipelineConfig,
    pub github_token: Option<String>,
    pub development_branch: String,
}

fn pick<T>(cli: Option<T>, env_val: Option<T>, file_val: Option<T>, default: T) -> T {
    cli.or(env_val).or(file_val).unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl ResolvedConfig {
    pub fn resolve(cli: &CliOverrides) -> Self {
        let file = load_config().ok();

        let redis_url = pick(
            cli.redis_url.clone(),
            env_string("AIDP_REDIS_URL"),
            file.as_ref().and_then(|f| f.redis_url.clone()),
            PipelineConfig::DEFAULT_REDIS_URL.to_owned(),
        );
        let github_token = cli
            .github_token
            .clone()
            .or_else(|| env_string("AIDP_GITHUB_TOKEN"))
            .or_else(|| file.as_ref().and_then(|f| f.github_token.clone()));
        let generation_cli_path = pick(
            None,
            env_string("AIDP_GENERATION_CLI_PATH"),
            file.as_ref().and_then(|f| f.generation_cli_path.clone()),
            PipelineConfig::DEFAULT_GENERATION_CLI_PATH.to_owned(),
        );
        let workspace_root = pick(
            None,
            env_string("AIDP_WORKSPACE_ROOT"),
            file.as_ref().and_then(|f| f.workspace_root.clone()),
            PipelineConfig::from_env().workspace_root.display().to_string(),
        );
        let worker_poll_interval_secs = pick(
            None,
            env_u64("AIDP_WORKER_POLL_INTERVAL_SECS"),
            file.as_ref().and_then(|f| f.worker_poll_interval_secs),
            PipelineConfig::DEFAULT_WORKER_POLL_SECS,
        );
        let monitor_poll_interval_secs = pick(
            None,
            env_u64("MONITOR_POLL_INTERVAL"),
            file.as_ref().and_then(|f| f.monitor_poll_interval_secs),
            PipelineConfig::DEFAULT_MONITOR_POLL_SECS,
        );
        let worker_stall_minutes = pick(
            None,
            env_u64("WORKER_STALL_MINUTES"),
            file.as_ref().and_then(|f| f.worker_stall_minutes),
            PipelineConfig::DEFAULT_STALL_MINUTES,
        );
        let ci_max_fix_attempts = pick(
            None,
            env_u64("MAX_FIX_ATTEMPTS").map(|v| v as u32),
            file.as_ref().and_then(|f| f.ci_max_fix_attempts),
            PipelineConfig::DEFAULT_CI_MAX_FIX_ATTEMPTS,
        );
        let deployment_domain = pick(
            None,
            env_string("AIDP_DEPLOYMENT_DOMAIN"),
            file.as_ref().and_then(|f| f.deployment_domain.clone()),
            PipelineConfig::DEFAULT_DEPLOYMENT_DOMAIN.to_owned(),
        );
        let deployment_port_range_start = pick(
            None,
            env_u64("AIDP_PORT_RANGE_START").map(|v| v as u16),
            file.as_ref().and_then(|f| f.deployment_port_range_start),
            PipelineConfig::DEFAULT_PORT_RANGE_START,
        );
        let container_image_prefix = pick(
            None,
            env_string("AIDP_CONTAINER_IMAGE_PREFIX"),
            file.as_ref().and_then(|f| f.container_image_prefix.clone()),
            PipelineConfig::DEFAULT_CONTAINER_IMAGE_PREFIX.to_owned(),
        );
        let default_pipeline_home = dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".ai-dev-pipeline");
        let port_allocations_path = pick(
            None,
            env_string("AIDP_PORT_ALLOCATIONS_PATH"),
            file.as_ref().and_then(|f| f.port_allocations_path.clone()),
            default_pipeline_home.join("port_allocations.json").display().to_string(),
        );
        let default_cloudflared_home = dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".cloudflared");
        let ingress_config_path = pick(
            None,
            env_string("AIDP_INGRESS_CONFIG_PATH"),
            file.as_ref().and_then(|f| f.ingress_config_path.clone()),
            default_cloudflared_home.join("config.yml").display().to_string(),
        );
        let tunnel_name = pick(
            None,
            env_string("AIDP_TUNNEL_NAME"),
            file.as_ref().and_then(|f| f.tunnel_name.clone()),
            PipelineConfig::DEFAULT_TUNNEL_NAME.to_owned(),
        );
        let development_branch = pick(
            None,
            env_string("AIDP_DEVELOPMENT_BRANCH"),
            file.as_ref().and_then(|f| f.development_branch.clone()),
            "main".to_owned(),
        );

        Self {
            pipeline: PipelineConfig {
                redis_url,
                generation_cli_path,
                workspace_root: PathBuf::from(workspace_root),
                worker_poll_interval: std::time::Duration::from_secs(worker_poll_interval_secs),
                monitor_poll_interval: std::time::Duration::from_secs(monitor_poll_interval_secs),
                worker_stall_threshold: std::time::Duration::from_secs(worker_stall_minutes * 60),
                ci_max_fix_attempts,
                deployment_domain,
                deployment_port_range_start,
                container_image_prefix,
                port_allocations_path: PathBuf::from(port_allocations_path),
                ingress_config_path: PathBuf::from(ingress_config_path),
                tunnel_name,
            },
            github_token,
            development_branch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_defaults_with_no_overrides_or_file() {
        let resolved = ResolvedConfig::resolve(&CliOverrides::default());
        assert_eq!(resolved.development_branch, "main");
        assert!(!resolved.pipeline.redis_url.is_empty());
    }

    #[test]
    fn cli_override_wins_over_everything() {
        let overrides =
            CliOverrides { redis_url: Some("redis://cli-wins:6379".to_owned()), github_token: None };
        let resolved = ResolvedConfig::resolve(&overrides);
        assert_eq!(resolved.pipeline.redis_url, "redis://cli-wins:6379");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        assert!(config_path().ends_with("ai-dev-pipeline/config.toml"));
    }
}
