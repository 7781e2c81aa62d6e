//! Repository layering stage.
//!
//! Merges an ordered list of repositories into a staging directory via the
//! external merge tool, then swaps the result into the published path.
//! Source order is the layering semantic: later sources win on package
//! conflicts.
//!
//! The stage is re-runnable. A staging directory left over from a prior
//! failed run is removed before merging (the merge tool refuses to write
//! into a pre-existing destination), and the previously published layer is
//! removed only after the new merge has succeeded, so a failure at any
//! point leaves the last good layer intact.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::exec::{run_tool, ExecError, ToolInvocation};
use crate::workspace::Workspace;

/// Errors from the layering stage.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("merge needs at least 2 sources, got {0}")]
    TooFewSources(usize),

    #[error("merge tool failed with exit code {exit_code}\n{}", .stderr_tail.join("\n"))]
    MergeFailed {
        exit_code: i32,
        stderr_tail: Vec<String>,
    },

    #[error("merge tool terminated by signal\n{}", .stderr_tail.join("\n"))]
    MergeKilled { stderr_tail: Vec<String> },

    #[error("merge tool exited 0 but produced no output at {}", .path.display())]
    MergeOutputMissing { path: PathBuf },

    #[error("failed to clear staging directory {}: {}", .path.display(), .source)]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to publish layer at {}: {}", .path.display(), .source)]
    PublishFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("merge cancelled")]
    Cancelled,

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// One merge source: a local repository path or a remote repository URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RepoSource {
    Path(PathBuf),
    Url(String),
}

impl RepoSource {
    /// Interpret a configuration string: anything with a URL scheme is
    /// remote, everything else is a local path.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://") {
            RepoSource::Url(s.to_string())
        } else {
            RepoSource::Path(PathBuf::from(s))
        }
    }

    /// The value handed to the merge tool's `--repo` option.
    pub fn as_repo_arg(&self) -> String {
        match self {
            RepoSource::Path(p) => p.display().to_string(),
            RepoSource::Url(u) => u.clone(),
        }
    }
}

impl From<&Path> for RepoSource {
    fn from(p: &Path) -> Self {
        RepoSource::Path(p.to_path_buf())
    }
}

impl fmt::Display for RepoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_repo_arg())
    }
}

/// An ordered merge: ≥2 sources, later sources win, one destination name.
#[derive(Debug, Clone)]
pub struct MergeSpec {
    sources: Vec<RepoSource>,
    name: String,
}

impl MergeSpec {
    pub fn new(sources: Vec<RepoSource>, name: impl Into<String>) -> Result<Self, LayerError> {
        if sources.len() < 2 {
            return Err(LayerError::TooFewSources(sources.len()));
        }
        Ok(Self {
            sources,
            name: name.into(),
        })
    }

    pub fn sources(&self) -> &[RepoSource] {
        &self.sources
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The final published layer, as downstream consumers see it.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedLayer {
    /// Final directory, e.g. `<target-dir>/hybrid-buildroot`.
    pub path: PathBuf,
    /// Merge sources in precedence order.
    pub sources: Vec<String>,
    pub published_at: DateTime<Utc>,
    /// Merge tool wall-clock time.
    pub duration: Duration,
}

/// Runs the merge tool and publishes its output atomically.
pub struct RepoLayeringStage<'a> {
    workspace: &'a Workspace,
    mergerepo: &'a Path,
}

impl<'a> RepoLayeringStage<'a> {
    pub fn new(workspace: &'a Workspace, mergerepo: &'a Path) -> Self {
        Self {
            workspace,
            mergerepo,
        }
    }

    /// The exact merge invocation for `spec`, writing into `staging`.
    pub fn invocation(&self, spec: &MergeSpec, staging: &Path) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(self.mergerepo);
        for source in &spec.sources {
            invocation = invocation.arg("--repo").arg(source.as_repo_arg());
        }
        invocation.arg("-o").arg(staging.display().to_string())
    }

    /// Merge and publish.
    ///
    /// Step order is load-bearing: the previous published layer is removed
    /// only once the new merge exists, and the final step is a single
    /// rename, so readers of the published path see either the old complete
    /// layer or the new one.
    pub fn merge(
        &self,
        spec: &MergeSpec,
        cancel: &Arc<AtomicBool>,
    ) -> Result<PublishedLayer, LayerError> {
        let staging = self.workspace.staging_dir(spec.name());
        let published = self.workspace.published_dir(spec.name());

        // 1. Clear leftovers from a prior (possibly failed) run.
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| LayerError::Staging {
                path: staging.clone(),
                source: e,
            })?;
        }

        // 2. Merge into staging.
        let invocation = self.invocation(spec, &staging);
        let log_path = self.workspace.stage_log("merge");
        let output = run_tool(&invocation, &log_path, cancel)?;

        if output.cancelled {
            return Err(LayerError::Cancelled);
        }
        let duration = output.duration;
        match output.exit_code {
            Some(0) => {}
            Some(code) => {
                return Err(LayerError::MergeFailed {
                    exit_code: code,
                    stderr_tail: output.stderr_tail,
                });
            }
            None => {
                return Err(LayerError::MergeKilled {
                    stderr_tail: output.stderr_tail,
                });
            }
        }
        if !staging.is_dir() {
            return Err(LayerError::MergeOutputMissing { path: staging });
        }

        // 3. Retire the previous layer, now that its replacement exists.
        if published.exists() {
            fs::remove_dir_all(&published).map_err(|e| LayerError::PublishFailed {
                path: published.clone(),
                source: e,
            })?;
        }

        // 4. Single atomic rename into place.
        fs::rename(&staging, &published).map_err(|e| LayerError::PublishFailed {
            path: published.clone(),
            source: e,
        })?;

        Ok(PublishedLayer {
            path: published,
            sources: spec.sources.iter().map(RepoSource::as_repo_arg).collect(),
            published_at: Utc::now(),
            duration,
        })
    }
}
