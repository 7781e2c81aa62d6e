//! Workspace layout and run locking.
//!
//! Every path the pipeline touches is computed from an explicit
//! [`Workspace`] value rather than assumed from cwd or environment, so each
//! stage can be exercised against a scratch directory in tests.
//!
//! Concurrent orchestrator runs against the same target directory are
//! excluded with an advisory file lock. Contention fails fast; there is no
//! queueing.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Lock file name inside the target directory.
pub const LOCK_FILE_NAME: &str = ".compose.lock";

/// The target-directory tree shared by all stages.
#[derive(Debug, Clone)]
pub struct Workspace {
    target_dir: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `target_dir`, creating the directory if
    /// it does not yet exist.
    pub fn create(target_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(target_dir)?;
        Ok(Self {
            target_dir: target_dir.to_path_buf(),
        })
    }

    /// A path-only view of a workspace. Nothing on disk is touched or
    /// required to exist; used to compute paths for dry-run output.
    pub fn at(target_dir: &Path) -> Self {
        Self {
            target_dir: target_dir.to_path_buf(),
        }
    }

    /// The target directory itself.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// The generator-maintained "latest" link for a release.
    pub fn latest_dir(&self, latest_name: &str) -> PathBuf {
        self.target_dir.join(latest_name)
    }

    /// Output repository for one variant/arch under a compose root:
    /// `<root>/compose/<variant>/<arch>/os`.
    pub fn variant_os_dir(compose_root: &Path, variant: &str, arch: &str) -> PathBuf {
        compose_root.join("compose").join(variant).join(arch).join("os")
    }

    /// Final path of a published layer.
    pub fn published_dir(&self, name: &str) -> PathBuf {
        self.target_dir.join(name)
    }

    /// Staging directory the merge tool writes into before publication.
    /// Hidden so downstream consumers scanning the target dir never pick it
    /// up.
    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.target_dir.join(format!(".{name}.staging"))
    }

    /// Log file capturing full output of a pipeline stage.
    pub fn stage_log(&self, stage: &str) -> PathBuf {
        self.target_dir.join(format!("{stage}.log"))
    }

    /// Path of the per-run summary document.
    pub fn run_summary_path(&self) -> PathBuf {
        self.target_dir.join("run_summary.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.target_dir.join(LOCK_FILE_NAME)
    }

    /// Take the advisory run lock for this workspace.
    ///
    /// Returns `Ok(None)` when another process already holds it.
    pub fn try_lock(&self) -> io::Result<Option<RunLock>> {
        let file = File::create(self.lock_path())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(RunLock { _file: file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_makes_target_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("composes");
        let ws = Workspace::create(&target).unwrap();
        assert!(target.is_dir());
        assert_eq!(ws.target_dir(), target);
    }

    #[test]
    fn test_at_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("composes");
        let ws = Workspace::at(&target);
        assert_eq!(ws.target_dir(), target);
        assert!(!target.exists());
    }

    #[test]
    fn test_path_layout() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();

        assert_eq!(ws.latest_dir("latest-MBI"), dir.path().join("latest-MBI"));
        assert_eq!(
            ws.published_dir("hybrid-buildroot"),
            dir.path().join("hybrid-buildroot")
        );
        assert_eq!(
            ws.staging_dir("hybrid-buildroot"),
            dir.path().join(".hybrid-buildroot.staging")
        );
        assert_eq!(ws.stage_log("compose"), dir.path().join("compose.log"));

        let os = Workspace::variant_os_dir(&dir.path().join("latest-MBI"), "Everything", "x86_64");
        assert_eq!(
            os,
            dir.path()
                .join("latest-MBI/compose/Everything/x86_64/os")
        );
    }

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();

        let held = ws.try_lock().unwrap();
        assert!(held.is_some());

        // fs2 locks are per-file-handle, so a second open in the same
        // process is enough to observe contention.
        let second = ws.try_lock().unwrap();
        assert!(second.is_none());

        drop(held);
        assert!(ws.try_lock().unwrap().is_some());
    }
}
