//! Compose generation stage.
//!
//! Drives the external compose generator and, on success, locates the
//! output tree it produced. The generator is expensive and not safe to
//! blindly re-run, so a non-zero exit is fatal: no retry, and a partial
//! output tree is never reported as "latest". The partial directory is left
//! on disk for postmortem inspection.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use walkdir::WalkDir;

use crate::config::ComposeConfig;
use crate::exec::{run_tool, ExecError, ToolInvocation};
use crate::workspace::Workspace;

/// Errors from the compose stage.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("compose generator failed with exit code {exit_code}\n{}", .stderr_tail.join("\n"))]
    Failed {
        exit_code: i32,
        stderr_tail: Vec<String>,
    },

    #[error("compose generator terminated by signal\n{}", .stderr_tail.join("\n"))]
    Killed { stderr_tail: Vec<String> },

    #[error("compose output missing: {} does not exist or contains no variant/arch tree", .path.display())]
    OutputMissing { path: PathBuf },

    #[error("compose cancelled")]
    Cancelled,

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// One variant/arch output repository inside a compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantArchRepo {
    pub variant: String,
    pub arch: String,
    /// The `os/` directory holding packages and repodata.
    pub os_dir: PathBuf,
}

/// Immutable record of a successfully completed compose.
///
/// Constructed only after the generator exited 0 and the output tree was
/// found on disk.
#[derive(Debug, Clone)]
pub struct ComposeResult {
    /// Root of the compose output (the resolved "latest" directory).
    pub output_root: PathBuf,
    /// Compose id as recorded by the generator, when present.
    pub compose_id: Option<String>,
    /// Every variant/arch repository found under the output root.
    pub repos: Vec<VariantArchRepo>,
    /// Generator wall-clock time.
    pub duration: Duration,
}

impl ComposeResult {
    /// Output repository for one variant/arch, if the compose produced it.
    pub fn os_dir(&self, variant: &str, arch: &str) -> Option<&Path> {
        self.repos
            .iter()
            .find(|r| r.variant == variant && r.arch == arch)
            .map(|r| r.os_dir.as_path())
    }
}

/// Invokes the compose generator and locates its output.
pub struct ComposeRunner<'a> {
    config: &'a ComposeConfig,
    workspace: &'a Workspace,
}

impl<'a> ComposeRunner<'a> {
    pub fn new(config: &'a ComposeConfig, workspace: &'a Workspace) -> Self {
        Self { config, workspace }
    }

    /// The exact generator invocation, without running it. Used by dry-run
    /// output and by `run`.
    pub fn invocation(&self, config_path: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.config.tools.compose)
            .arg("--no-label")
            .arg("--target-dir")
            .arg(self.workspace.target_dir().display().to_string())
            .arg("--config")
            .arg(config_path.display().to_string())
    }

    /// Run the generator to completion and locate the produced tree.
    ///
    /// `config_path` is passed through to the generator untouched; the
    /// skip-phase list and everything else the generator needs travel in
    /// that file.
    pub fn run(
        &self,
        config_path: &Path,
        cancel: &Arc<AtomicBool>,
    ) -> Result<ComposeResult, ComposeError> {
        let invocation = self.invocation(config_path);
        let log_path = self.workspace.stage_log("compose");
        let output = run_tool(&invocation, &log_path, cancel)?;

        if output.cancelled {
            return Err(ComposeError::Cancelled);
        }
        match output.exit_code {
            Some(0) => {}
            Some(code) => {
                return Err(ComposeError::Failed {
                    exit_code: code,
                    stderr_tail: output.stderr_tail,
                });
            }
            None => {
                return Err(ComposeError::Killed {
                    stderr_tail: output.stderr_tail,
                });
            }
        }

        let mut result = locate_output(
            &self.workspace.latest_dir(&self.config.latest_dir_name()),
        )?;
        result.duration = output.duration;
        Ok(result)
    }
}

/// Resolve a compose output root and enumerate its variant/arch repos.
///
/// Public so the layering stage can be re-run against an existing compose
/// without re-generating it.
pub fn locate_output(latest: &Path) -> Result<ComposeResult, ComposeError> {
    // The generator maintains "latest" as a symlink to the timestamped
    // compose; resolve it so the result names the real directory.
    let output_root = latest
        .canonicalize()
        .map_err(|_| ComposeError::OutputMissing {
            path: latest.to_path_buf(),
        })?;

    let compose_dir = output_root.join("compose");
    let mut repos = Vec::new();
    for entry in WalkDir::new(&compose_dir)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_dir() || entry.file_name() != "os" {
            continue;
        }
        let os_dir = entry.path().to_path_buf();
        let arch_dir = os_dir.parent().expect("depth 3 entry has parent");
        let variant_dir = arch_dir.parent().expect("depth 3 entry has grandparent");
        repos.push(VariantArchRepo {
            variant: variant_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            arch: arch_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            os_dir,
        });
    }

    if repos.is_empty() {
        return Err(ComposeError::OutputMissing {
            path: latest.to_path_buf(),
        });
    }
    repos.sort_by(|a, b| (&a.variant, &a.arch).cmp(&(&b.variant, &b.arch)));

    let compose_id = fs::read_to_string(output_root.join("COMPOSE_ID"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(ComposeResult {
        output_root,
        compose_id,
        repos,
        duration: Duration::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_compose_tree(root: &Path, variants: &[(&str, &str)]) {
        for (variant, arch) in variants {
            let os = root
                .join("compose")
                .join(variant)
                .join(arch)
                .join("os");
            fs::create_dir_all(os.join("repodata")).unwrap();
        }
    }

    #[test]
    fn test_locate_output_enumerates_repos() {
        let dir = TempDir::new().unwrap();
        let latest = dir.path().join("latest-MBI");
        make_compose_tree(&latest, &[("Everything", "x86_64"), ("Everything", "aarch64")]);
        fs::write(latest.join("COMPOSE_ID"), "MBI-Java-20190206.n.0\n").unwrap();

        let result = locate_output(&latest).unwrap();
        assert_eq!(result.compose_id.as_deref(), Some("MBI-Java-20190206.n.0"));
        assert_eq!(result.repos.len(), 2);
        assert_eq!(result.repos[0].arch, "aarch64");
        assert!(result.os_dir("Everything", "x86_64").unwrap().ends_with(
            "latest-MBI/compose/Everything/x86_64/os"
        ));
        assert!(result.os_dir("Server", "x86_64").is_none());
    }

    #[test]
    fn test_locate_output_missing_dir() {
        let dir = TempDir::new().unwrap();
        let err = locate_output(&dir.path().join("latest-MBI")).unwrap_err();
        assert!(matches!(err, ComposeError::OutputMissing { .. }));
    }

    #[test]
    fn test_locate_output_empty_tree_rejected() {
        let dir = TempDir::new().unwrap();
        let latest = dir.path().join("latest-MBI");
        fs::create_dir_all(latest.join("compose")).unwrap();

        let err = locate_output(&latest).unwrap_err();
        assert!(matches!(err, ComposeError::OutputMissing { .. }));
    }

    #[test]
    fn test_locate_output_resolves_symlink() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("MBI-Java-20190206.n.0");
        make_compose_tree(&real, &[("Everything", "x86_64")]);

        let latest = dir.path().join("latest-MBI");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real, &latest).unwrap();
        #[cfg(not(unix))]
        return;

        let result = locate_output(&latest).unwrap();
        assert_eq!(result.output_root, real.canonicalize().unwrap());
    }
}
