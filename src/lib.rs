//! hybrid-compose - compose-pipeline orchestrator
//!
//! This crate drives a distribution compose from configuration to a
//! published, layered buildroot repository: it validates the declarative
//! compose configuration, invokes the external compose generator, merges a
//! secondary repository over the compose's output repo, and atomically
//! replaces the previously published result.

pub mod compose;
pub mod config;
pub mod exec;
pub mod layer;
pub mod phase;
pub mod pipeline;
pub mod signal;
pub mod summary;
pub mod workspace;

pub use compose::{ComposeResult, ComposeRunner};
pub use config::{ComposeConfig, ConfigError};
pub use layer::{MergeSpec, PublishedLayer, RepoLayeringStage, RepoSource};
pub use phase::Phase;
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PipelineReport};
pub use workspace::Workspace;
