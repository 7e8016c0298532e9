//! `aidp project create|list|switch|delete`.

use anyhow::{bail, Context, Result};
use chrono::Utc;

use aidp_core::project_registry::{ProjectRecord, ProjectRegistry, ProjectStatus};

pub fn run_create(
    workspace_root: &std::path::Path,
    name: &str,
    requirements: &str,
    repo: Option<String>,
) -> Result<()> {
    let mut registry = ProjectRegistry::restore(workspace_root).context("failed to restore project registry")?;
    if registry.get(name).is_some() {
        bail!("project '{name}' already exists");
    }

    let record = ProjectRecord {
        name: name.to_owned(),
        workspace_path: workspace_root.join(name),
        requirements: requirements.to_owned(),
        repo,
        status: ProjectStatus::ReadyForDevelopment,
        created_at: Utc::now(),
        published_url: None,
    };
    registry.upsert(record)?;
    println!("Project '{name}' created.");
    Ok(())
}

pub fn run_list(workspace_root: &std::path::Path) -> Result<()> {
    let registry = ProjectRegistry::restore(workspace_root).context("failed to restore project registry")?;
    let active = registry.active_name();

    let mut projects = registry.list();
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    if projects.is_empty() {
        println!("No projects yet. Run `aidp project create <name> <requirements>`.");
        return Ok(());
    }

    for project in projects {
        let marker = if active == Some(project.name.as_str()) { "*" } else { " " };
        println!(
            "{marker} {:<24} {:<20} {}",
            project.name,
            format!("{:?}", project.status),
            project.repo.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub fn run_switch(workspace_root: &std::path::Path, name: &str) -> Result<()> {
    let registry = ProjectRegistry::restore(workspace_root).context("failed to restore project registry")?;
    let record = registry.get(name).with_context(|| format!("unknown project '{name}'"))?.clone();

    // Restoration selects the most recently modified project's metadata
    // file as active; re-persisting this project's record bumps its mtime
    // ahead of every other project without needing a separate pointer file.
    let mut registry = registry;
    registry.upsert(record)?;
    println!("Switched active project to '{name}'.");
    Ok(())
}

pub fn run_delete(workspace_root: &std::path::Path, name: &str) -> Result<()> {
    let mut registry = ProjectRegistry::restore(workspace_root).context("failed to restore project registry")?;
    if registry.get(name).is_none() {
        bail!("unknown project '{name}'");
    }
    registry.delete(name)?;
    println!("Project '{name}' deleted.");
    Ok(())
}

/// Resolve the active project, or error with guidance if there isn't one.
pub fn require_active(workspace_root: &std::path::Path) -> Result<ProjectRecord> {
    let registry = ProjectRegistry::restore(workspace_root).context("failed to restore project registry")?;
    registry
        .active_project()
        .cloned()
        .context("no active project; run `aidp project create` or `aidp project switch` first")
}
