//! Shared collaborator construction: every subcommand that needs the
//! broker, the upstream adapter, or the generation executor builds them the
//! same way, from the same resolved config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;

use aidp_broker::config::BrokerConfig;
use aidp_core::agent_runtime::ProjectGitConfig;
use aidp_core::generation::GenerationExecutor;
use aidp_core::upstream::{GitHubUpstream, Upstream};

use crate::config::ResolvedConfig;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub async fn connect_broker(config: &ResolvedConfig) -> Result<ConnectionManager> {
    let broker_config = BrokerConfig::new(config.pipeline.redis_url.clone());
    aidp_broker::client::create_client(&broker_config).await
}

pub fn build_upstream(config: &ResolvedConfig) -> Result<Arc<dyn Upstream>> {
    let token = config
        .github_token
        .clone()
        .context("no GitHub token configured; set AIDP_GITHUB_TOKEN or github_token in config.toml")?;
    Ok(Arc::new(GitHubUpstream::new(token)?))
}

pub fn build_generation(config: &ResolvedConfig) -> GenerationExecutor {
    GenerationExecutor::new(config.pipeline.generation_cli_path.clone(), GENERATION_TIMEOUT)
}

/// Best-effort HTTPS clone URL for a project's `owner/name` upstream
/// repository; push credentials are left to the ambient git credential
/// helper or SSH agent rather than embedded in the URL.
pub fn git_config(config: &ResolvedConfig, repo: &str) -> ProjectGitConfig {
    ProjectGitConfig {
        remote_url: format!("https://github.com/{repo}.git"),
        development_branch: config.development_branch.clone(),
    }
}
