//! Compose pipeline phases.
//!
//! The external generator runs a fixed set of named phases; a configuration
//! may skip any subset of them. The skip-list is validated against this
//! enumeration up front so a typoed phase name is a configuration error
//! rather than a silently ignored entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named phase of the compose pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Pkgset,
    Buildinstall,
    Gather,
    ExtraFiles,
    Createrepo,
    Createiso,
    ExtraIsos,
    LiveMedia,
    ImageBuild,
    Osbs,
    Repoclosure,
    Test,
}

/// All known phases, in pipeline order.
pub const ALL_PHASES: &[Phase] = &[
    Phase::Init,
    Phase::Pkgset,
    Phase::Buildinstall,
    Phase::Gather,
    Phase::ExtraFiles,
    Phase::Createrepo,
    Phase::Createiso,
    Phase::ExtraIsos,
    Phase::LiveMedia,
    Phase::ImageBuild,
    Phase::Osbs,
    Phase::Repoclosure,
    Phase::Test,
];

impl Phase {
    /// The phase name as it appears in configuration files and generator
    /// command lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Pkgset => "pkgset",
            Phase::Buildinstall => "buildinstall",
            Phase::Gather => "gather",
            Phase::ExtraFiles => "extra_files",
            Phase::Createrepo => "createrepo",
            Phase::Createiso => "createiso",
            Phase::ExtraIsos => "extra_isos",
            Phase::LiveMedia => "live_media",
            Phase::ImageBuild => "image_build",
            Phase::Osbs => "osbs",
            Phase::Repoclosure => "repoclosure",
            Phase::Test => "test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a phase name is not in the known set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PHASES
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_phases() {
        for phase in ALL_PHASES {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), *phase);
        }
    }

    #[test]
    fn test_unknown_phase_rejected() {
        let err = "createios".parse::<Phase>().unwrap_err();
        assert_eq!(err, UnknownPhase("createios".to_string()));
        assert!(err.to_string().contains("createios"));
    }

    #[test]
    fn test_display_matches_config_spelling() {
        assert_eq!(Phase::ExtraFiles.to_string(), "extra_files");
        assert_eq!(Phase::Createiso.to_string(), "createiso");
    }
}
