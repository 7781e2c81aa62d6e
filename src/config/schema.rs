//! Validated configuration types.
//!
//! These are the post-validation types the rest of the pipeline consumes.
//! Raw TOML deserialization lives in `load.rs`; by the time a
//! [`ComposeConfig`] exists, every enumerated value has been checked.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// How the generator gathers packages into variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatherMethod {
    /// Resolve dependencies of the input package list.
    Deps,
    /// Take the input list literally, no dependency resolution.
    Nodeps,
}

/// Greedy strategy when multiple providers satisfy a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GreedyMethod {
    None,
    All,
    Build,
}

/// Where the package set comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PkgsetSource {
    Koji,
}

/// Supported digest algorithms for createrepo and media checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External tool locations.
///
/// Overridable so deployments can pin versioned binaries and tests can
/// substitute stub executables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Compose generator program.
    pub compose: PathBuf,
    /// Repository merge program.
    pub mergerepo: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            compose: PathBuf::from("pungi-koji"),
            mergerepo: PathBuf::from("mergerepo_c"),
        }
    }
}

/// Layering setup: which compose output repo seeds the merge, which extra
/// repositories are layered on top of it, and the published name.
///
/// `repos` order is significant: later sources win on package conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeringConfig {
    /// Name of the published layer directory (e.g. "hybrid-buildroot").
    pub name: String,
    /// Variant whose output repository seeds the merge.
    pub variant: String,
    /// Architecture whose output repository seeds the merge.
    pub arch: String,
    /// Additional repositories (local path or remote URL) merged over the
    /// compose output, in precedence order.
    pub repos: Vec<String>,
}

/// Validated compose configuration.
///
/// Field set mirrors the generator's declarative option surface; the
/// orchestrator itself only interprets `skip_phases`, `[tools]` and
/// `[layering]`, and passes the rest through via the config file.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeConfig {
    pub release_name: String,
    pub release_short: String,
    pub release_version: String,
    pub release_is_layered: bool,
    pub bootable: bool,
    pub variants_file: PathBuf,
    /// Signing keys; a `None` entry admits unsigned packages.
    pub sigkeys: Vec<Option<String>>,
    pub hashed_directories: bool,
    pub runroot: bool,
    pub pkgset_source: PkgsetSource,
    pub pkgset_koji_inherit: bool,
    pub koji_profile: String,
    pub filter_system_release_packages: bool,
    pub pdc_url: Option<String>,
    pub pdc_insecure: bool,
    pub pdc_develop: bool,
    pub gather_method: GatherMethod,
    pub check_deps: bool,
    pub greedy_method: GreedyMethod,
    pub createrepo_c: bool,
    pub createrepo_checksum: ChecksumAlgorithm,
    pub media_checksums: Vec<ChecksumAlgorithm>,
    pub create_jigdo: bool,
    /// Phases the generator must skip, in configuration order.
    pub skip_phases: Vec<Phase>,
    pub tools: ToolsConfig,
    pub layering: LayeringConfig,
}

impl ComposeConfig {
    /// Directory name of the generator-maintained "latest" link for this
    /// release, e.g. `latest-MBI`.
    pub fn latest_dir_name(&self) -> String {
        format!("latest-{}", self.release_name)
    }
}
