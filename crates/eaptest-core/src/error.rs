//! Suite-level error taxonomy.
//!
//! Per-type execution failures never surface here; they terminate in a typed
//! [`RunResult`](crate::report::RunResult). Only conditions that are fatal for
//! the whole suite become a `SuiteError`.

use crate::build::BuildError;
use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("dependency error: {0}")]
    Dependency(#[from] BuildError),

    #[error("no supported package manager found (checked: apt, dnf, pacman, brew)")]
    UnknownPlatform,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SuiteError {
    /// Process exit code for errors raised before a report exists.
    ///
    /// Mirrors [`Verdict::exit_code`](crate::report::Verdict::exit_code):
    /// configuration problems are 2, dependency problems are 3, anything
    /// else is a general failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SuiteError::Config(_) => 2,
            SuiteError::Dependency(_) | SuiteError::UnknownPlatform => 3,
            SuiteError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_match_taxonomy() {
        let config = SuiteError::Config(ConfigError::NotFound(PathBuf::from("x.json")));
        assert_eq!(config.exit_code(), 2);

        let dep = SuiteError::Dependency(BuildError::BuildFailed("make exited 2".into()));
        assert_eq!(dep.exit_code(), 3);

        assert_eq!(SuiteError::UnknownPlatform.exit_code(), 3);
    }
}
