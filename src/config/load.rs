//! TOML loading, provenance and validation.
//!
//! Raw deserialization is deliberately loose (enumerated options come in as
//! strings) so that validation can produce errors that name the offending
//! field and value, rather than whatever a derive-level parse error would
//! say. Unknown top-level keys are rejected outright: a typoed option must
//! never be silently ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::schema::{
    ChecksumAlgorithm, ComposeConfig, GatherMethod, GreedyMethod, LayeringConfig, PkgsetSource,
    ToolsConfig,
};
use crate::phase::Phase;

/// Configuration errors. Fatal, raised before any subprocess starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Provenance of a loaded configuration: where it came from and the SHA-256
/// of its raw bytes. Carried into the run summary so a published layer can
/// be traced back to the exact config that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// File path, or None for inline sources (tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Hex SHA-256 digest of the raw config bytes.
    pub sha256: String,
}

/// Raw deserialization target. Enumerated options are plain strings here;
/// `validate` turns them into typed values.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    release_name: String,
    release_short: String,
    release_version: String,
    #[serde(default)]
    release_is_layered: bool,
    #[serde(default)]
    bootable: bool,
    variants_file: PathBuf,
    /// TOML cannot express null in arrays; an empty-string entry means
    /// "admit unsigned packages".
    #[serde(default)]
    sigkeys: Vec<String>,
    #[serde(default)]
    hashed_directories: bool,
    #[serde(default)]
    runroot: bool,
    #[serde(default = "default_pkgset_source")]
    pkgset_source: String,
    #[serde(default = "default_true")]
    pkgset_koji_inherit: bool,
    #[serde(default = "default_koji_profile")]
    koji_profile: String,
    #[serde(default)]
    filter_system_release_packages: bool,
    #[serde(default)]
    pdc_url: Option<String>,
    #[serde(default)]
    pdc_insecure: bool,
    #[serde(default)]
    pdc_develop: bool,
    #[serde(default = "default_gather_method")]
    gather_method: String,
    #[serde(default)]
    check_deps: bool,
    #[serde(default = "default_greedy_method")]
    greedy_method: String,
    #[serde(default = "default_true")]
    createrepo_c: bool,
    #[serde(default = "default_checksum")]
    createrepo_checksum: String,
    #[serde(default = "default_media_checksums")]
    media_checksums: Vec<String>,
    #[serde(default)]
    create_jigdo: bool,
    #[serde(default)]
    skip_phases: Vec<String>,
    #[serde(default)]
    tools: RawTools,
    layering: RawLayering,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTools {
    #[serde(default = "default_compose_tool")]
    compose: PathBuf,
    #[serde(default = "default_mergerepo_tool")]
    mergerepo: PathBuf,
}

impl Default for RawTools {
    fn default() -> Self {
        Self {
            compose: default_compose_tool(),
            mergerepo: default_mergerepo_tool(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLayering {
    name: String,
    variant: String,
    arch: String,
    #[serde(default)]
    repos: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_pkgset_source() -> String {
    "koji".to_string()
}

fn default_koji_profile() -> String {
    "koji".to_string()
}

fn default_gather_method() -> String {
    "deps".to_string()
}

fn default_greedy_method() -> String {
    "none".to_string()
}

fn default_checksum() -> String {
    "sha256".to_string()
}

fn default_media_checksums() -> Vec<String> {
    vec!["sha256".to_string()]
}

fn default_compose_tool() -> PathBuf {
    ToolsConfig::default().compose
}

fn default_mergerepo_tool() -> PathBuf {
    ToolsConfig::default().mergerepo
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<(ComposeConfig, ConfigSource), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::Parse(format!("invalid UTF-8 in {}: {}", path.display(), e)))?;

    let config = validate(parse(&contents)?)?;
    let source = ConfigSource {
        path: Some(path.to_string_lossy().into_owned()),
        sha256,
    };
    Ok((config, source))
}

/// Load and validate a configuration from an in-memory string.
pub fn load_config_str(contents: &str) -> Result<(ComposeConfig, ConfigSource), ConfigError> {
    let mut hasher = Sha256::new();
    hasher.update(contents.as_bytes());
    let sha256 = hex::encode(hasher.finalize());

    let config = validate(parse(contents)?)?;
    Ok((config, ConfigSource { path: None, sha256 }))
}

fn parse(contents: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn validate(raw: RawConfig) -> Result<ComposeConfig, ConfigError> {
    let sigkeys = validate_sigkeys(&raw.sigkeys)?;

    let pkgset_source = match raw.pkgset_source.as_str() {
        "koji" => PkgsetSource::Koji,
        other => {
            return Err(invalid("pkgset_source", other, "expected 'koji'"));
        }
    };

    let gather_method = match raw.gather_method.as_str() {
        "deps" => GatherMethod::Deps,
        "nodeps" => GatherMethod::Nodeps,
        other => {
            return Err(invalid("gather_method", other, "expected 'deps' or 'nodeps'"));
        }
    };

    let greedy_method = match raw.greedy_method.as_str() {
        "none" => GreedyMethod::None,
        "all" => GreedyMethod::All,
        "build" => GreedyMethod::Build,
        other => {
            return Err(invalid(
                "greedy_method",
                other,
                "expected 'none', 'all' or 'build'",
            ));
        }
    };

    let createrepo_checksum = parse_checksum("createrepo_checksum", &raw.createrepo_checksum)?;

    let media_checksums = raw
        .media_checksums
        .iter()
        .map(|c| parse_checksum("media_checksums", c))
        .collect::<Result<Vec<_>, _>>()?;

    let skip_phases = raw
        .skip_phases
        .iter()
        .map(|name| {
            name.parse::<Phase>()
                .map_err(|_| invalid("skip_phases", name, "not a known pipeline phase"))
        })
        .collect::<Result<Vec<Phase>, _>>()?;

    if raw.layering.repos.is_empty() {
        return Err(invalid(
            "layering.repos",
            "[]",
            "at least one repository must be layered over the compose output",
        ));
    }

    Ok(ComposeConfig {
        release_name: raw.release_name,
        release_short: raw.release_short,
        release_version: raw.release_version,
        release_is_layered: raw.release_is_layered,
        bootable: raw.bootable,
        variants_file: raw.variants_file,
        sigkeys,
        hashed_directories: raw.hashed_directories,
        runroot: raw.runroot,
        pkgset_source,
        pkgset_koji_inherit: raw.pkgset_koji_inherit,
        koji_profile: raw.koji_profile,
        filter_system_release_packages: raw.filter_system_release_packages,
        pdc_url: raw.pdc_url,
        pdc_insecure: raw.pdc_insecure,
        pdc_develop: raw.pdc_develop,
        gather_method,
        check_deps: raw.check_deps,
        greedy_method,
        createrepo_c: raw.createrepo_c,
        createrepo_checksum,
        media_checksums,
        create_jigdo: raw.create_jigdo,
        skip_phases,
        tools: ToolsConfig {
            compose: raw.tools.compose,
            mergerepo: raw.tools.mergerepo,
        },
        layering: LayeringConfig {
            name: raw.layering.name,
            variant: raw.layering.variant,
            arch: raw.layering.arch,
            repos: raw.layering.repos,
        },
    })
}

fn sigkey_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[0-9a-f]{8,16}$").expect("static regex"))
}

/// A sigkey is a short lowercase hex key id; an empty entry admits unsigned
/// packages.
fn validate_sigkeys(raw: &[String]) -> Result<Vec<Option<String>>, ConfigError> {
    let key_id = sigkey_pattern();
    raw.iter()
        .map(|entry| {
            if entry.is_empty() {
                Ok(None)
            } else if key_id.is_match(entry) {
                Ok(Some(entry.clone()))
            } else {
                Err(invalid(
                    "sigkeys",
                    entry,
                    "expected a lowercase hex key id, or an empty entry for unsigned",
                ))
            }
        })
        .collect()
}

fn parse_checksum(field: &'static str, value: &str) -> Result<ChecksumAlgorithm, ConfigError> {
    match value {
        "md5" => Ok(ChecksumAlgorithm::Md5),
        "sha1" => Ok(ChecksumAlgorithm::Sha1),
        "sha256" => Ok(ChecksumAlgorithm::Sha256),
        "sha512" => Ok(ChecksumAlgorithm::Sha512),
        other => Err(invalid(field, other, "not a supported digest algorithm")),
    }
}

fn invalid(field: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        release_name = "MBI"
        release_short = "MBI"
        release_version = "Java"
        variants_file = "variants.xml"
    "#;

    const LAYERING: &str = r#"
        [layering]
        name = "hybrid-buildroot"
        variant = "Everything"
        arch = "x86_64"
        repos = ["https://example.org/f29-buildroot"]
    "#;

    /// Base options plus extra top-level keys, with the layering table
    /// appended last so the extras stay at document root.
    fn config_with(extra: &str) -> String {
        format!("{BASE}\n{extra}\n{LAYERING}")
    }

    #[test]
    fn test_minimal_config_defaults() {
        let (config, source) = load_config_str(&config_with("")).unwrap();
        assert_eq!(config.release_version, "Java");
        assert_eq!(config.gather_method, GatherMethod::Deps);
        assert_eq!(config.greedy_method, GreedyMethod::None);
        assert_eq!(config.createrepo_checksum, ChecksumAlgorithm::Sha256);
        assert_eq!(config.media_checksums, vec![ChecksumAlgorithm::Sha256]);
        assert!(config.skip_phases.is_empty());
        assert!(config.pkgset_koji_inherit);
        assert_eq!(config.tools.compose, PathBuf::from("pungi-koji"));
        assert_eq!(source.path, None);
        assert_eq!(source.sha256.len(), 64);
    }

    #[test]
    fn test_skip_phases_parsed_in_order() {
        let contents = config_with("skip_phases = [\"createiso\", \"buildinstall\"]");
        let (config, _) = load_config_str(&contents).unwrap();
        assert_eq!(config.skip_phases, vec![Phase::Createiso, Phase::Buildinstall]);
    }

    #[test]
    fn test_unknown_skip_phase_names_field() {
        let contents = config_with("skip_phases = [\"createios\"]");
        let err = load_config_str(&contents).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("skip_phases"), "got: {msg}");
        assert!(msg.contains("createios"), "got: {msg}");
    }

    #[test]
    fn test_unknown_option_rejected() {
        let contents = config_with("release_nam = \"typo\"");
        let err = load_config_str(&contents).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_media_checksum() {
        let contents = config_with("media_checksums = [\"crc32\"]");
        let err = load_config_str(&contents).unwrap_err();
        assert!(err.to_string().contains("media_checksums"));
    }

    #[test]
    fn test_sigkeys_nullable_entries() {
        let contents = config_with("sigkeys = [\"\", \"429476b4\"]");
        let (config, _) = load_config_str(&contents).unwrap();
        assert_eq!(config.sigkeys, vec![None, Some("429476b4".to_string())]);
    }

    #[test]
    fn test_sigkeys_bad_key_id() {
        let contents = config_with("sigkeys = [\"NOT-A-KEY\"]");
        let err = load_config_str(&contents).unwrap_err();
        assert!(err.to_string().contains("sigkeys"));
    }

    #[test]
    fn test_layering_requires_repos() {
        let contents = config_with("").replace(
            "repos = [\"https://example.org/f29-buildroot\"]",
            "repos = []",
        );
        let err = load_config_str(&contents).unwrap_err();
        assert!(err.to_string().contains("layering.repos"));
    }

    #[test]
    fn test_bad_gather_method() {
        let contents = config_with("gather_method = \"greedy\"");
        let err = load_config_str(&contents).unwrap_err();
        assert!(err.to_string().contains("gather_method"));
    }

    #[test]
    fn test_latest_dir_name() {
        let (config, _) = load_config_str(&config_with("")).unwrap();
        assert_eq!(config.latest_dir_name(), "latest-MBI");
    }
}
