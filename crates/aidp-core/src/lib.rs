//! Core library for the autonomous development pipeline: git and upstream
//! plumbing, the self-healing generation envelope, the Agent Runtime, the
//! worker pool, the pipeline monitor, the project registry, and the
//! deployment finisher.

pub mod agent_runtime;
pub mod config;
pub mod deployment;
pub mod error;
pub mod generation;
pub mod git_ops;
pub mod issue_classifier;
pub mod logging;
pub mod pipeline_monitor;
pub mod project_registry;
pub mod retry;
pub mod upstream;
pub mod worker_pool;
