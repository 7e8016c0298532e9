//! `aidp test`: run the active project's test suite without going through
//! a worker.

use anyhow::{bail, Context};

use aidp_core::agent_runtime::run_project_tests;

use crate::project_cmds;

pub async fn run(workspace_root: &std::path::Path) -> anyhow::Result<()> {
    let project = project_cmds::require_active(workspace_root)?;

    match run_project_tests(&project.workspace_path).await {
        Ok(Some(())) => {
            println!("Tests passed for '{}'.", project.name);
            Ok(())
        }
        Ok(None) => {
            println!("No recognised test framework in '{}'; skipped.", project.name);
            Ok(())
        }
        Err(output) => {
            println!("{output}");
            bail!("tests failed for '{}'", project.name)
        }
    }
    .context("test run failed")
}
