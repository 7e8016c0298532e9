//! `aidp deploy`/`aidp redeploy`, and the [`RedeployTrigger`] the worker
//! pool's Devops agent kind calls into for redeploy-on-demand tasks. Both
//! paths end up at the same [`DeploymentFinisher`].

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use aidp_core::agent_runtime::RedeployTrigger;
use aidp_core::deployment::{DeploymentConfig, DeploymentFinisher};

use crate::config::ResolvedConfig;
use crate::project_cmds;

fn finisher(config: &ResolvedConfig) -> DeploymentFinisher {
    DeploymentFinisher::new(DeploymentConfig {
        domain: config.pipeline.deployment_domain.clone(),
        image_prefix: config.pipeline.container_image_prefix.clone(),
        port_range_start: config.pipeline.deployment_port_range_start,
        port_allocations_path: config.pipeline.port_allocations_path.clone(),
        ingress_config_path: config.pipeline.ingress_config_path.clone(),
        tunnel_name: config.pipeline.tunnel_name.clone(),
    })
}

pub async fn run_deploy(config: &ResolvedConfig, workspace_root: &std::path::Path) -> Result<()> {
    let project = project_cmds::require_active(workspace_root)?;
    let outcome = finisher(config).deploy(&project.name, &project.workspace_path).await;
    report(&project.name, &outcome)
}

pub async fn run_redeploy(config: &ResolvedConfig, workspace_root: &std::path::Path) -> Result<()> {
    run_deploy(config, workspace_root).await
}

fn report(project_name: &str, outcome: &aidp_core::deployment::DeploymentOutcome) -> Result<()> {
    if !outcome.success {
        bail!("deployment failed for '{project_name}': {}", outcome.note);
    }
    match &outcome.url {
        Some(url) => println!("Deployed '{project_name}' at {url} ({})", outcome.note),
        None => println!("Deployed '{project_name}' ({})", outcome.note),
    }
    Ok(())
}

/// Wraps the finisher so the worker pool can trigger a redeploy by repo name
/// alone, resolving it back to the matching project record on every call
/// rather than caching the active project at pool-start time.
pub struct FinisherRedeployTrigger {
    config: ResolvedConfig,
    workspace_root: PathBuf,
}

impl FinisherRedeployTrigger {
    pub fn new(config: ResolvedConfig, workspace_root: PathBuf) -> Self {
        Self { config, workspace_root }
    }
}

#[async_trait]
impl RedeployTrigger for FinisherRedeployTrigger {
    async fn trigger_redeploy(&self, repo: &str) -> anyhow::Result<String> {
        let registry = aidp_core::project_registry::ProjectRegistry::restore(&self.workspace_root)?;
        let project = registry
            .list()
            .into_iter()
            .find(|p| p.repo.as_deref() == Some(repo))
            .with_context(|| format!("no project registered for repo '{repo}'"))?;

        let outcome = finisher(&self.config).deploy(&project.name, &project.workspace_path).await;
        if !outcome.success {
            bail!("redeploy failed for '{repo}': {}", outcome.note);
        }
        outcome.url.context("deployment succeeded but produced no URL")
    }
}
