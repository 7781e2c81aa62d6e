//! Pipeline orchestration.
//!
//! Composes the three stages linearly: load and validate configuration,
//! run the compose generator, layer and publish the merged repository.
//! Strict fail-fast: the first failing stage aborts the run, nothing is
//! retried, and the failure carries the external tool's exit code and
//! stderr tail so it can be diagnosed without re-running. A run summary is
//! written on every exit path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ulid::Ulid;

use crate::compose::{locate_output, ComposeError, ComposeResult, ComposeRunner};
use crate::config::{load_config, ComposeConfig, ConfigError};
use crate::layer::{LayerError, MergeSpec, PublishedLayer, RepoLayeringStage, RepoSource};
use crate::signal::EXIT_CODE_CANCELLED;
use crate::summary::{RunSummary, StageSummary, Status};
use crate::workspace::Workspace;

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("target directory error: {0}")]
    Workspace(#[source] io::Error),

    #[error("another compose run holds the lock on {}", .0.display())]
    Locked(PathBuf),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error("compose produced no output repo for variant '{variant}' arch '{arch}'")]
    SeedRepoMissing { variant: String, arch: String },

    #[error(transparent)]
    Layer(#[from] LayerError),
}

impl PipelineError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 1,
            PipelineError::Workspace(_) => 1,
            PipelineError::Locked(_) => 75,
            PipelineError::Compose(ComposeError::Cancelled) => EXIT_CODE_CANCELLED,
            PipelineError::Compose(_) => 40,
            PipelineError::SeedRepoMissing { .. } => 40,
            PipelineError::Layer(LayerError::Cancelled) => EXIT_CODE_CANCELLED,
            PipelineError::Layer(LayerError::PublishFailed { .. }) => 70,
            PipelineError::Layer(_) => 50,
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Orchestrator options, all explicit; nothing is read from cwd or
/// environment.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Path to the compose configuration file.
    pub config_path: PathBuf,
    /// Target directory shared by the generator output and the published
    /// layer.
    pub target_dir: PathBuf,
    /// Progress commentary on stderr.
    pub verbose: bool,
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: String,
    pub compose_id: Option<String>,
    pub published: PublishedLayer,
}

/// The pipeline driver.
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Full run: config → compose → layer. The summary lands in the target
    /// directory on success and on failure alike.
    pub fn run(&self, cancel: &Arc<AtomicBool>) -> PipelineResult<PipelineReport> {
        let workspace =
            Workspace::create(&self.options.target_dir).map_err(PipelineError::Workspace)?;

        // No summary on contention: the active run owns run_summary.json.
        let _lock = match workspace.try_lock().map_err(PipelineError::Workspace)? {
            Some(lock) => lock,
            None => return Err(PipelineError::Locked(self.options.target_dir.clone())),
        };

        let mut summary = RunSummary::new(Ulid::new().to_string());

        let (config, source) = match load_config(&self.options.config_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                summary
                    .stages
                    .push(StageSummary::failed("config", None, e.to_string()));
                summary.stages.push(StageSummary::skipped("compose"));
                summary.stages.push(StageSummary::skipped("layer"));
                summary.status = Status::Failed;
                if let Err(w) = summary.write_to_file(&workspace.run_summary_path()) {
                    eprintln!("warning: failed to write run summary: {w}");
                }
                return Err(e.into());
            }
        };
        summary.config = Some(source);
        summary.stages.push(StageSummary::success("config", 0));

        let result = self.run_stages(&config, &workspace, cancel, &mut summary);
        match &result {
            Ok(report) => {
                summary.status = Status::Success;
                summary.compose_id = report.compose_id.clone();
                summary.published_path = Some(report.published.path.display().to_string());
            }
            Err(e) => {
                summary.status = if e.exit_code() == EXIT_CODE_CANCELLED {
                    Status::Cancelled
                } else {
                    Status::Failed
                };
            }
        }
        if let Err(e) = summary.write_to_file(&workspace.run_summary_path()) {
            eprintln!("warning: failed to write run summary: {e}");
        }

        result
    }

    fn run_stages(
        &self,
        config: &ComposeConfig,
        workspace: &Workspace,
        cancel: &Arc<AtomicBool>,
        summary: &mut RunSummary,
    ) -> PipelineResult<PipelineReport> {
        if self.options.verbose {
            eprintln!(
                "composing {} {} into {}",
                config.release_name,
                config.release_version,
                workspace.target_dir().display()
            );
        }

        let runner = ComposeRunner::new(config, workspace);
        let compose = match runner.run(&self.options.config_path, cancel) {
            Ok(compose) => {
                summary.stages.push(StageSummary::success(
                    "compose",
                    compose.duration.as_millis() as u64,
                ));
                compose
            }
            Err(e) => {
                let exit_code = match &e {
                    ComposeError::Failed { exit_code, .. } => Some(*exit_code),
                    _ => None,
                };
                if matches!(e, ComposeError::Cancelled) {
                    summary.stages.push(StageSummary::cancelled("compose"));
                } else {
                    summary
                        .stages
                        .push(StageSummary::failed("compose", exit_code, e.to_string()));
                    // Partial output stays on disk for postmortem; it is
                    // just never reported as latest.
                    eprintln!(
                        "compose failed; partial output (if any) left under {}",
                        workspace.target_dir().display()
                    );
                }
                summary.stages.push(StageSummary::skipped("layer"));
                return Err(e.into());
            }
        };

        if self.options.verbose {
            if let Some(id) = &compose.compose_id {
                eprintln!("compose finished: {id}");
            }
            eprintln!(
                "layering {} repo(s) onto the compose output",
                config.layering.repos.len()
            );
        }

        let spec = build_merge_spec(config, &compose)?;
        let stage = RepoLayeringStage::new(workspace, &config.tools.mergerepo);
        let published = match stage.merge(&spec, cancel) {
            Ok(published) => {
                summary.stages.push(StageSummary::success(
                    "layer",
                    published.duration.as_millis() as u64,
                ));
                published
            }
            Err(e) => {
                let exit_code = match &e {
                    LayerError::MergeFailed { exit_code, .. } => Some(*exit_code),
                    _ => None,
                };
                if matches!(e, LayerError::Cancelled) {
                    summary.stages.push(StageSummary::cancelled("layer"));
                } else {
                    summary
                        .stages
                        .push(StageSummary::failed("layer", exit_code, e.to_string()));
                }
                return Err(e.into());
            }
        };

        if self.options.verbose {
            eprintln!("published {}", published.path.display());
        }

        Ok(PipelineReport {
            run_id: summary.run_id.clone(),
            compose_id: compose.compose_id.clone(),
            published,
        })
    }

    /// Re-run only the layering stage against an existing compose output.
    pub fn merge_only(&self, cancel: &Arc<AtomicBool>) -> PipelineResult<PublishedLayer> {
        let (config, _) = load_config(&self.options.config_path)?;
        let workspace =
            Workspace::create(&self.options.target_dir).map_err(PipelineError::Workspace)?;

        let _lock = match workspace.try_lock().map_err(PipelineError::Workspace)? {
            Some(lock) => lock,
            None => return Err(PipelineError::Locked(self.options.target_dir.clone())),
        };

        let compose = locate_output(&workspace.latest_dir(&config.latest_dir_name()))?;
        let spec = build_merge_spec(&config, &compose)?;
        let stage = RepoLayeringStage::new(&workspace, &config.tools.mergerepo);
        Ok(stage.merge(&spec, cancel)?)
    }

    /// Validate the config and describe the commands a run would execute,
    /// without spawning anything.
    pub fn plan(&self) -> PipelineResult<Vec<String>> {
        let (config, _) = load_config(&self.options.config_path)?;
        let workspace = Workspace::at(&self.options.target_dir);

        let runner = ComposeRunner::new(&config, &workspace);
        let compose_line = runner.invocation(&self.options.config_path).display_line();

        // The seed repo path is only known once the compose ran; the plan
        // shows the expected latest path.
        let latest = workspace.latest_dir(&config.latest_dir_name());
        let seed =
            Workspace::variant_os_dir(&latest, &config.layering.variant, &config.layering.arch);
        let spec = merge_spec_for_seed(&config, &seed)?;
        let stage = RepoLayeringStage::new(&workspace, &config.tools.mergerepo);
        let merge_line = stage
            .invocation(&spec, &workspace.staging_dir(spec.name()))
            .display_line();

        Ok(vec![compose_line, merge_line])
    }
}

/// Merge sources for a run: the compose's own output repo first, then the
/// configured layer repos, later entries winning.
fn build_merge_spec(config: &ComposeConfig, compose: &ComposeResult) -> PipelineResult<MergeSpec> {
    let seed = compose
        .os_dir(&config.layering.variant, &config.layering.arch)
        .ok_or_else(|| PipelineError::SeedRepoMissing {
            variant: config.layering.variant.clone(),
            arch: config.layering.arch.clone(),
        })?;
    merge_spec_for_seed(config, seed)
}

fn merge_spec_for_seed(config: &ComposeConfig, seed: &Path) -> PipelineResult<MergeSpec> {
    let mut sources = vec![RepoSource::from(seed)];
    sources.extend(config.layering.repos.iter().map(|r| RepoSource::parse(r)));
    Ok(MergeSpec::new(sources, config.layering.name.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::VariantArchRepo;
    use crate::config::load_config_str;
    use std::time::Duration;

    const CONFIG: &str = r#"
        release_name = "MBI"
        release_short = "MBI"
        release_version = "Java"
        variants_file = "variants.xml"

        [layering]
        name = "hybrid-buildroot"
        variant = "Everything"
        arch = "x86_64"
        repos = ["https://example.org/f29-buildroot"]
    "#;

    fn fake_compose(repos: Vec<VariantArchRepo>) -> ComposeResult {
        ComposeResult {
            output_root: PathBuf::from("/t/latest-MBI"),
            compose_id: Some("MBI-Java-20190206.n.0".to_string()),
            repos,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_build_merge_spec_orders_seed_first() {
        let (config, _) = load_config_str(CONFIG).unwrap();
        let compose = fake_compose(vec![VariantArchRepo {
            variant: "Everything".to_string(),
            arch: "x86_64".to_string(),
            os_dir: PathBuf::from("/t/latest-MBI/compose/Everything/x86_64/os"),
        }]);

        let spec = build_merge_spec(&config, &compose).unwrap();
        assert_eq!(spec.name(), "hybrid-buildroot");
        assert_eq!(
            spec.sources()[0],
            RepoSource::Path(PathBuf::from(
                "/t/latest-MBI/compose/Everything/x86_64/os"
            ))
        );
        assert_eq!(
            spec.sources()[1],
            RepoSource::Url("https://example.org/f29-buildroot".to_string())
        );
    }

    #[test]
    fn test_build_merge_spec_missing_variant() {
        let (config, _) = load_config_str(CONFIG).unwrap();
        let compose = fake_compose(vec![VariantArchRepo {
            variant: "Server".to_string(),
            arch: "x86_64".to_string(),
            os_dir: PathBuf::from("/t/os"),
        }]);

        let err = build_merge_spec(&config, &compose).unwrap_err();
        assert!(matches!(err, PipelineError::SeedRepoMissing { .. }));
        assert_eq!(err.exit_code(), 40);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PipelineError::Locked(PathBuf::from("/t")).exit_code(), 75);
        assert_eq!(
            PipelineError::Compose(ComposeError::Cancelled).exit_code(),
            80
        );
        assert_eq!(PipelineError::Layer(LayerError::Cancelled).exit_code(), 80);
        assert_eq!(
            PipelineError::Layer(LayerError::TooFewSources(1)).exit_code(),
            50
        );
    }
}
