//! Configuration loading and validation.
//!
//! The orchestrator reads one declarative TOML file describing the release,
//! the package-set source, gather/merge policy, the phase skip-list and the
//! layering setup. Loading is side-effect free: the file is read, digested
//! and validated into a [`ComposeConfig`], or rejected with a
//! [`ConfigError`] naming the offending field. No subprocess runs before
//! validation succeeds.

mod load;
mod schema;

pub use load::{load_config, load_config_str, ConfigError, ConfigSource};
pub use schema::{
    ChecksumAlgorithm, ComposeConfig, GatherMethod, GreedyMethod, LayeringConfig, PkgsetSource,
    ToolsConfig,
};
