//! Project Registry: in-memory map of project name to metadata plus a
//! single active-project pointer, persisted to disk as one JSON file per
//! project.
//!
//! Grounded on `original_source/agents/master_agent.py`'s
//! `current_project`/project-dict pattern, restructured as an explicit
//! registry type rather than fields scattered on a master agent, with
//! atomic write-to-temp-then-rename persistence (there is no corresponding
//! idiom in the teacher, which persists exclusively through Postgres; this
//! follows the general Rust filesystem-persistence convention instead).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pipeline_monitor::PipelineMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    ReadyForDevelopment,
    PipelineRunning,
    PipelineComplete,
    Deployed,
}

/// Persisted metadata for one project. Serialized verbatim to
/// `<workspace_root>/<name>/.project_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    pub workspace_path: PathBuf,
    pub requirements: String,
    pub repo: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub published_url: Option<String>,
}

const METADATA_FILE_NAME: &str = ".project_metadata.json";

fn metadata_path(workspace_root: &Path, name: &str) -> PathBuf {
    workspace_root.join(name).join(METADATA_FILE_NAME)
}

/// Write `record` atomically: serialize to `<path>.tmp` in the same
/// directory, then rename over the final path so a concurrent reader never
/// observes a partially-written file.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

/// Owns every known project's metadata and which one is active. Does not
/// itself own monitors beyond tracking which project currently has one
/// running; the caller supplies the monitor instance on `set_active`.
pub struct ProjectRegistry {
    workspace_root: PathBuf,
    projects: HashMap<String, ProjectRecord>,
    active: Option<String>,
    active_monitor: Option<PipelineMonitor>,
}

impl ProjectRegistry {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self { workspace_root: workspace_root.into(), projects: HashMap::new(), active: None, active_monitor: None }
    }

    /// Scan `workspace_root`'s immediate subdirectories for a
    /// `.project_metadata.json` file each, load every one that parses, and
    /// select the most recently modified as active. Corrupt files are
    /// logged and skipped, not fatal.
    pub fn restore(workspace_root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let workspace_root = workspace_root.into();
        let mut registry = Self::new(workspace_root.clone());

        let entries = match std::fs::read_dir(&workspace_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&workspace_root)?;
                return Ok(registry);
            }
            Err(e) => return Err(e),
        };

        let mut most_recent: Option<(String, std::time::SystemTime)> = None;

        for entry in entries.flatten() {
            let project_dir = entry.path();
            if !project_dir.is_dir() {
                continue;
            }
            let path = project_dir.join(METADATA_FILE_NAME);
            if !path.exists() {
                continue;
            }

            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read project metadata file");
                    continue;
                }
            };
            let record: ProjectRecord = match serde_json::from_str(&contents) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt project metadata file");
                    continue;
                }
            };

            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if most_recent.as_ref().is_none_or(|(_, t)| modified > *t) {
                most_recent = Some((record.name.clone(), modified));
            }

            registry.projects.insert(record.name.clone(), record);
        }

        registry.active = most_recent.map(|(name, _)| name);
        if let Some(name) = &registry.active {
            info!(project = %name, "restored most recently modified project as active");
        }

        Ok(registry)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_project(&self) -> Option<&ProjectRecord> {
        self.active.as_deref().and_then(|name| self.projects.get(name))
    }

    pub fn get(&self, name: &str) -> Option<&ProjectRecord> {
        self.projects.get(name)
    }

    pub fn list(&self) -> Vec<&ProjectRecord> {
        self.projects.values().collect()
    }

    /// Insert or replace a project's metadata and persist it.
    pub fn upsert(&mut self, record: ProjectRecord) -> std::io::Result<()> {
        let path = metadata_path(&self.workspace_root, &record.name);
        std::fs::create_dir_all(path.parent().expect("metadata path always has a parent"))?;
        let contents = serde_json::to_string_pretty(&record)?;
        write_atomic(&path, &contents)?;
        self.projects.insert(record.name.clone(), record);
        Ok(())
    }

    /// Remove a project's metadata from disk and from the registry. Clears
    /// the active pointer if it named this project.
    pub fn delete(&mut self, name: &str) -> std::io::Result<()> {
        let path = metadata_path(&self.workspace_root, name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        self.projects.remove(name);
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        Ok(())
    }

    /// Switch the active project, stopping the outgoing monitor (if any)
    /// before updating the pointer. The caller supplies the incoming
    /// project's monitor only when it has an upstream repository handle --
    /// a project with none simply runs without one.
    pub async fn set_active(&mut self, name: &str, incoming_monitor: Option<PipelineMonitor>) -> anyhow::Result<()> {
        if !self.projects.contains_key(name) {
            anyhow::bail!("unknown project '{name}'");
        }

        if let Some(monitor) = self.active_monitor.take() {
            monitor.stop().await;
        }

        self.active = Some(name.to_owned());
        self.active_monitor = incoming_monitor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> ProjectRecord {
        ProjectRecord {
            name: name.to_owned(),
            workspace_path: PathBuf::from(format!("/tmp/{name}")),
            requirements: "build a thing".to_owned(),
            repo: None,
            status: ProjectStatus::ReadyForDevelopment,
            created_at: Utc::now(),
            published_url: None,
        }
    }

    #[test]
    fn upsert_persists_and_restore_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut registry = ProjectRegistry::new(tmp.path());
            registry.upsert(sample("widgets")).unwrap();
        }

        let restored = ProjectRegistry::restore(tmp.path()).unwrap();
        assert!(restored.get("widgets").is_some());
        assert_eq!(restored.active_name(), Some("widgets"));
    }

    #[test]
    fn restore_selects_most_recently_modified_as_active() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut registry = ProjectRegistry::new(tmp.path());
            registry.upsert(sample("first")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
            registry.upsert(sample("second")).unwrap();
        }

        let restored = ProjectRegistry::restore(tmp.path()).unwrap();
        assert_eq!(restored.active_name(), Some("second"));
    }

    #[test]
    fn restore_skips_corrupt_files_without_failing() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("broken");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join(".project_metadata.json"), "{not json").unwrap();

        let restored = ProjectRegistry::restore(tmp.path()).unwrap();
        assert!(restored.list().is_empty());
    }

    #[test]
    fn upsert_persists_under_per_project_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = ProjectRegistry::new(tmp.path());
        registry.upsert(sample("widgets")).unwrap();

        assert!(tmp.path().join("widgets").join(".project_metadata.json").exists());
    }

    #[test]
    fn delete_clears_active_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = ProjectRegistry::new(tmp.path());
        registry.upsert(sample("widgets")).unwrap();
        registry.active = Some("widgets".to_owned());

        registry.delete("widgets").unwrap();
        assert!(registry.get("widgets").is_none());
        assert_eq!(registry.active_name(), None);
    }

    #[tokio::test]
    async fn set_active_rejects_unknown_project() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = ProjectRegistry::new(tmp.path());
        let result = registry.set_active("ghost", None).await;
        assert!(result.is_err());
    }
}
